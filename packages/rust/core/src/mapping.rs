//! Control mapping for relevant sections.
//!
//! Each section gets two independent sets of mappings, concatenated in this
//! order without deduplication:
//!
//! 1. deterministic rule hits (rule order, then `maps_to` order)
//! 2. mappings proposed by the judge (response order)
//!
//! The judge is constrained to 800-53, 800-171, and SSDF by its instructions.
//! Its identifiers are trusted, not checked against a control catalogue, but
//! an entry that does not decode (unknown framework, missing control) is
//! skipped on its own. Rule hits are never dropped.

use std::path::Path;

use futures::stream::{self, StreamExt};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use regbrief_llm::{Judge, JudgeRequest};
use regbrief_shared::{
    ControlMapping, MappedDocument, MappedSection, RegBriefError, RelevantDocument, Result,
    truncate_chars,
};

pub const MAPPING_INSTRUCTIONS: &str = "\
You map text to control frameworks.
Given a section, propose mappings with justification. Use only these frameworks:
- NIST 800-53 (e.g., SA-12, SA-15, CM-2, RA-5, SI-10)
- NIST 800-171 (e.g., 3.4.3, 3.14.1, 3.13.11)
- NIST 800-218 SSDF (e.g., PW.2, PW.4, PS.3, RV.1)

Return JSON: { mappings: [ {framework: \"...\", control: \"...\", reason: \"...\"} ] }
Keep concise, ensure the control identifiers actually exist.
";

/// Built-in rule set, compiled into the binary.
const BUILTIN_RULES: &str = include_str!("../rules/control_rules.toml");

// ---------------------------------------------------------------------------
// Rule set
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    patterns: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    #[serde(default)]
    name: Option<String>,
    regex: String,
    #[serde(default)]
    maps_to: Vec<ControlMapping>,
}

#[derive(Debug, Clone)]
struct ControlRule {
    name: String,
    pattern: Regex,
    maps_to: Vec<ControlMapping>,
}

/// Ordered pattern → mappings rules.
#[derive(Debug, Clone)]
pub struct ControlRules {
    rules: Vec<ControlRule>,
}

impl ControlRules {
    /// The rule set shipped with regbrief.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_RULES)
    }

    /// Load `path` when given, otherwise the built-in rules.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| RegBriefError::io(path, e))?;
                Self::from_toml(&raw)
            }
            None => Self::builtin(),
        }
    }

    /// Parse and compile a rule file. Patterns are case-insensitive.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(raw)
            .map_err(|e| RegBriefError::config(format!("invalid control rules: {e}")))?;

        let rules = file
            .patterns
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                let name = spec.name.unwrap_or_else(|| format!("rule-{}", i + 1));
                let pattern = RegexBuilder::new(&spec.regex)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        RegBriefError::config(format!("control rule {name}: invalid regex: {e}"))
                    })?;
                Ok(ControlRule {
                    name,
                    pattern,
                    maps_to: spec.maps_to,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every mapping of every matching rule, in rule order.
    pub fn matches(&self, text: &str) -> Vec<ControlMapping> {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(text))
            .inspect(|rule| debug!(rule = %rule.name, "control rule matched"))
            .flat_map(|rule| rule.maps_to.iter().cloned())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct MappingResponse {
    #[serde(default)]
    mappings: Vec<Value>,
}

/// Attach rule and judge mappings to every section of every document.
///
/// Document and section order are preserved. Judge transport errors propagate.
#[instrument(skip_all, fields(documents = documents.len(), rules = rules.len()))]
pub async fn map_controls(
    judge: &dyn Judge,
    rules: &ControlRules,
    documents: Vec<RelevantDocument>,
    max_chars: usize,
    concurrency: usize,
) -> Result<Vec<MappedDocument>> {
    let jobs: Vec<String> = documents
        .iter()
        .flat_map(|d| &d.sections)
        .map(|s| truncate_chars(&s.text, max_chars).to_string())
        .collect();

    let proposed: Vec<Result<Vec<ControlMapping>>> = stream::iter(jobs)
        .map(|payload| propose_mappings(judge, payload))
        .buffered(concurrency.max(1))
        .collect()
        .await;
    let mut proposed = proposed.into_iter();

    let mut mapped = Vec::with_capacity(documents.len());
    for doc in documents {
        let mut sections = Vec::with_capacity(doc.sections.len());
        for section in doc.sections {
            let delegated = proposed.next().unwrap_or_else(|| Ok(Vec::new()))?;
            let mut mappings = rules.matches(&section.text);
            mappings.extend(delegated);
            sections.push(MappedSection { section, mappings });
        }
        mapped.push(MappedDocument {
            document: doc.document,
            sections,
        });
    }

    info!(
        sections = mapped.iter().map(|d| d.sections.len()).sum::<usize>(),
        "control mapping complete"
    );
    Ok(mapped)
}

async fn propose_mappings(judge: &dyn Judge, payload: String) -> Result<Vec<ControlMapping>> {
    let response: MappingResponse = judge
        .judge(&JudgeRequest::structured(MAPPING_INSTRUCTIONS, payload))
        .await?
        .decode();

    Ok(response
        .mappings
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<ControlMapping>(entry.clone()) {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                debug!(%entry, error = %e, "unusable mapping entry skipped");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::{FnJudge, document};
    use regbrief_llm::Judgment;
    use regbrief_shared::{Framework, Section};

    fn relevant(id: &str, sections: &[(&str, &str)]) -> RelevantDocument {
        RelevantDocument {
            document: document(id, "content"),
            sections: sections
                .iter()
                .map(|(t, x)| Section {
                    title: t.to_string(),
                    text: x.to_string(),
                })
                .collect(),
        }
    }

    const TWO_RULES: &str = r#"
        [[patterns]]
        name = "sbom"
        regex = 'sbom'
        maps_to = [
          { framework = "SSDF", control = "PS.3", reason = "release archive" },
          { framework = "800-53", control = "CM-8" },
        ]

        [[patterns]]
        regex = 'signing'
        maps_to = [{ framework = "800-53", control = "SI-7", reason = "integrity" }]
    "#;

    #[test]
    fn builtin_rules_compile() {
        let rules = ControlRules::builtin().unwrap();
        assert!(!rules.is_empty());
        assert!(!rules.matches("Produce an SBOM for every release").is_empty());
    }

    #[test]
    fn rule_hits_follow_rule_order_case_insensitive() {
        let rules = ControlRules::from_toml(TWO_RULES).unwrap();
        let hits = rules.matches("Signing and SBOM requirements");
        let controls: Vec<_> = hits.iter().map(|m| m.control.as_str()).collect();
        assert_eq!(controls, vec!["PS.3", "CM-8", "SI-7"]);
        assert_eq!(hits[1].reason, "");
    }

    #[test]
    fn invalid_rules_are_config_errors() {
        let err = ControlRules::from_toml("[[patterns]]\nregex = '('\n").unwrap_err();
        assert!(matches!(err, RegBriefError::Config { .. }));
        assert!(err.to_string().contains("rule-1"));

        let err = ControlRules::from_toml(
            "[[patterns]]\nregex = 'x'\nmaps_to = [{ framework = \"ISO\", control = \"A.1\" }]\n",
        )
        .unwrap_err();
        assert!(matches!(err, RegBriefError::Config { .. }));
    }

    #[test]
    fn load_reads_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, TWO_RULES).unwrap();
        assert_eq!(ControlRules::load(Some(&path)).unwrap().len(), 2);
        assert!(ControlRules::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[tokio::test]
    async fn rule_hits_precede_delegated_without_dedup() {
        let rules = ControlRules::from_toml(TWO_RULES).unwrap();
        let judge = FnJudge::new(|_| {
            Ok(Judgment::Structured(json!({
                "mappings": [
                    { "framework": "NIST 800-218 SSDF", "control": "PS.3", "reason": "dup of rule" },
                    { "framework": "ISO 27001", "control": "A.12" },
                    "garbage",
                    { "framework": "800-171", "control": "3.14.1", "reason": "flaws" }
                ]
            })))
        });

        let docs = vec![relevant("src01", &[("S", "Publish an SBOM")])];
        let mapped = map_controls(&judge, &rules, docs, 6000, 2).await.unwrap();

        let mappings = &mapped[0].sections[0].mappings;
        let got: Vec<_> = mappings
            .iter()
            .map(|m| (m.framework, m.control.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                (Framework::Ssdf, "PS.3"),
                (Framework::Sp80053, "CM-8"),
                (Framework::Ssdf, "PS.3"),
                (Framework::Sp800171, "3.14.1"),
            ]
        );
    }

    #[tokio::test]
    async fn preserves_document_and_section_order() {
        let rules = ControlRules::from_toml("").unwrap();
        let judge = FnJudge::new(|req| {
            Ok(Judgment::Structured(json!({
                "mappings": [{ "framework": "800-53", "control": req.payload.clone() }]
            })))
        });

        let docs = vec![
            relevant("src01", &[("a", "A1"), ("b", "A2")]),
            relevant("src02", &[("c", "B1")]),
        ];
        let mapped = map_controls(&judge, &rules, docs, 6000, 3).await.unwrap();

        let controls: Vec<Vec<_>> = mapped
            .iter()
            .map(|d| d.sections.iter().map(|s| s.mappings[0].control.clone()).collect())
            .collect();
        assert_eq!(controls, vec![vec!["A1", "A2"], vec!["B1"]]);
        assert_eq!(mapped[0].sections[1].section.title, "b");
    }

    #[tokio::test]
    async fn mapping_payload_is_truncated_section_text() {
        let rules = ControlRules::from_toml("").unwrap();
        let judge = FnJudge::new(|req| {
            assert_eq!(req.payload, "0123");
            Ok(Judgment::Text("not json".into()))
        });

        let docs = vec![relevant("src01", &[("t", "0123456789")])];
        let mapped = map_controls(&judge, &rules, docs, 4, 1).await.unwrap();
        assert!(mapped[0].sections[0].mappings.is_empty());
    }
}
