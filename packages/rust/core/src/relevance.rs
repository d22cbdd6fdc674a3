//! Software-engineering relevance filter.
//!
//! Every extracted document goes to the judge with fixed relevance criteria.
//! Documents for which the judge keeps no section are dropped silently; a
//! malformed response counts as "no sections". A cheap key-term scan runs
//! alongside and is only logged; it never skips the judgment.

use std::sync::LazyLock;

use futures::stream::{self, StreamExt};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use regbrief_llm::{Judge, JudgeRequest};
use regbrief_shared::{ExtractedDocument, RelevantDocument, Result, Section, truncate_chars};

pub const RELEVANCE_INSTRUCTIONS: &str = "\
You are filtering regulatory text for **software/IT engineering relevance**.
Keep sections that affect software development orgs: SDLC/SSDF, CI/CD, SAST/DAST, SBOM, \
supply-chain, IaC, containers/Kubernetes, cloud-native, handling CUI/PII in software, and \
mappings to 800-53/800-171/SSDF.

Return JSON with:
- kept_sections: [ {title:..., text:...} ]
Discard general policy prose unless it clearly impacts software teams.
";

/// Key terms that suggest a document matters to software teams.
const KEY_TERMS: &[&str] = &[
    r"\bSSDF\b",
    r"\bSBOM\b",
    r"\bSLSA\b",
    r"\bCI[/ -]?CD\b",
    r"\bpipelines?\b",
    r"\bSAST\b",
    r"\bDAST\b",
    r"\bIaC\b",
    r"\bKubernetes\b",
    r"\bcontainers?\b",
    r"\bcode review\b",
    r"\bsupply[- ]chain\b",
    r"\bdependency\b",
    r"\bCUI\b",
    r"\bPII\b",
    r"\b800-53\b",
    r"\b800-171\b",
    r"\b800-218\b",
    r"\bFedRAMP\b",
    r"\bprovenance\b",
    r"\bsigning\b",
    r"\bartifact\b",
];

#[derive(Debug, Default, Deserialize)]
struct RelevanceResponse {
    #[serde(default)]
    kept_sections: Vec<Section>,
}

/// Whether any key term occurs in `text` (case-insensitive).
pub fn heuristic_hit(text: &str) -> bool {
    static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        KEY_TERMS
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .expect("valid regex")
            })
            .collect()
    });

    PATTERNS.iter().any(|re| re.is_match(text))
}

/// Keep the documents the judge finds relevant, with exactly the sections it returned.
///
/// Output preserves input order. Judge transport errors propagate.
#[instrument(skip_all, fields(documents = documents.len()))]
pub async fn filter_relevant(
    judge: &dyn Judge,
    documents: Vec<ExtractedDocument>,
    max_chars: usize,
    concurrency: usize,
) -> Result<Vec<RelevantDocument>> {
    let judged: Vec<Result<(ExtractedDocument, Vec<Section>)>> = stream::iter(documents)
        .map(|document| async move {
            judge_document(judge, &document, max_chars)
                .await
                .map(|sections| (document, sections))
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut kept = Vec::new();
    for result in judged {
        let (document, sections) = result?;
        if sections.is_empty() {
            debug!(id = %document.source.id, "no relevant sections, dropped");
            continue;
        }
        kept.push(RelevantDocument { document, sections });
    }

    info!(kept = kept.len(), "relevance filter complete");
    Ok(kept)
}

async fn judge_document(
    judge: &dyn Judge,
    document: &ExtractedDocument,
    max_chars: usize,
) -> Result<Vec<Section>> {
    debug!(
        id = %document.source.id,
        heuristic_hit = heuristic_hit(&document.content),
        "judging relevance"
    );

    let payload = format!("SOURCE:\n\n{}", truncate_chars(&document.content, max_chars));
    let response: RelevanceResponse = judge
        .judge(&JudgeRequest::structured(RELEVANCE_INSTRUCTIONS, payload))
        .await?
        .decode();

    Ok(response.kept_sections)
}
