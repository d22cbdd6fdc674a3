//! Pipeline value types for regbrief runs.
//!
//! Every entity here is created by exactly one stage and passed by value to the
//! next; nothing is shared or mutated across stages.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RegBriefError;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Opaque per-run identifier (8 lowercase hex characters).
///
/// Collision-tolerant, not guaranteed unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh run identifier from the random tail of a UUID v7.
    pub fn generate() -> Self {
        let simple = Uuid::now_v7().simple().to_string();
        Self(simple[simple.len() - 8..].to_string())
    }

    /// Wrap an existing identifier (used when replaying or in tests).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Orchestrator state. The flow is strictly linear; `Failed` is reachable from
/// any state on an unrecovered error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovering,
    Extracting,
    Filtering,
    Mapping,
    Summarizing,
    Publishing,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovering => "discovering",
            Self::Extracting => "extracting",
            Self::Filtering => "filtering",
            Self::Mapping => "mapping",
            Self::Summarizing => "summarizing",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, checked by the orchestrator at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The current stage finishes; the next one does not start.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Which search produced a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceOrigin {
    PrimarySearch,
    FallbackSearch,
}

/// A discovered candidate document. Immutable after discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Stable per-run identifier (`src01`, `src02`, ...).
    pub id: String,
    pub url: String,
    pub title: String,
    pub origin: SourceOrigin,
    /// Free-form publication date or snippet; may be empty.
    #[serde(default)]
    pub published: String,
}

impl Source {
    /// Metadata row used in reports and summary grounding.
    pub fn note(&self) -> SourceNote {
        SourceNote {
            id: self.id.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
            published: self.published.clone(),
        }
    }
}

/// Flat source metadata (id, title, url, published).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNote {
    pub id: String,
    pub title: String,
    pub url: String,
    pub published: String,
}

// ---------------------------------------------------------------------------
// Stored artifacts
// ---------------------------------------------------------------------------

/// A file written by the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    /// Path relative to the output root, `/`-separated. Also the PR file path.
    pub path: String,
    pub sha256: String,
    pub size_bytes: usize,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A source plus its extracted text. Content is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub source: Source,
    pub content: String,
    /// Where the raw text was persisted.
    pub stored: StoredArtifact,
}

/// A titled passage kept by the relevance filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

/// An extracted document with at least one relevant section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevantDocument {
    pub document: ExtractedDocument,
    pub sections: Vec<Section>,
}

/// Control framework a mapping cites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Framework {
    /// NIST SP 800-53.
    Sp80053,
    /// NIST SP 800-171.
    Sp800171,
    /// NIST SP 800-218 (Secure Software Development Framework).
    Ssdf,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sp80053 => "800-53",
            Self::Sp800171 => "800-171",
            Self::Ssdf => "SSDF",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = RegBriefError;

    /// Accepts the canonical names plus the longer spellings models tend to use
    /// (`NIST SP 800-53`, `NIST 800-218 SSDF`, ...).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        if upper.contains("800-171") {
            Ok(Self::Sp800171)
        } else if upper.contains("800-53") {
            Ok(Self::Sp80053)
        } else if upper.contains("SSDF") || upper.contains("800-218") {
            Ok(Self::Ssdf)
        } else {
            Err(RegBriefError::parse(format!("unknown control framework: {s}")))
        }
    }
}

impl TryFrom<String> for Framework {
    type Error = RegBriefError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl Serialize for Framework {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One control citation for a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMapping {
    pub framework: Framework,
    pub control: String,
    #[serde(default)]
    pub reason: String,
}

/// A section with its accumulated mappings (rule hits first, then delegated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedSection {
    #[serde(flatten)]
    pub section: Section,
    pub mappings: Vec<ControlMapping>,
}

/// A relevant document whose sections carry control mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedDocument {
    pub document: ExtractedDocument,
    pub sections: Vec<MappedSection>,
}

// ---------------------------------------------------------------------------
// Run record / report
// ---------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed { stage: Stage, error: String },
}

/// The auditable record of one orchestrator invocation, written as `run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub date: NaiveDate,
    pub topic: String,
    pub dry_run: bool,
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<String>,
    pub pr_url: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<StoredArtifact>,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Report metadata block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMeta {
    /// Metadata for the sources that reached the summary.
    pub sources: Vec<SourceNote>,
}

/// What a caller of `run` gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub topic: String,
    pub found: usize,
    pub extracted: usize,
    pub kept: usize,
    pub summary_file: String,
    pub pr_url: Option<String>,
    pub meta: ReportMeta,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Return at most the first `max_chars` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_eight_hex_chars() {
        let id = RunId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn framework_parses_long_names() {
        assert_eq!("NIST SP 800-53".parse::<Framework>().unwrap(), Framework::Sp80053);
        assert_eq!("800-171".parse::<Framework>().unwrap(), Framework::Sp800171);
        assert_eq!("NIST 800-218 SSDF".parse::<Framework>().unwrap(), Framework::Ssdf);
        assert!("ISO 27001".parse::<Framework>().is_err());
    }

    #[test]
    fn control_mapping_serializes_canonical_framework() {
        let mapping = ControlMapping {
            framework: Framework::Ssdf,
            control: "PW.7".into(),
            reason: "code review".into(),
        };
        let json = serde_json::to_string(&mapping).unwrap();
        assert!(json.contains(r#""framework":"SSDF""#));

        let parsed: ControlMapping =
            serde_json::from_str(r#"{"framework":"NIST SP 800-53","control":"RA-5"}"#).unwrap();
        assert_eq!(parsed.framework, Framework::Sp80053);
        assert_eq!(parsed.reason, "");
    }

    #[test]
    fn mapped_section_flattens_title_and_text() {
        let section = MappedSection {
            section: Section {
                title: "SBOM".into(),
                text: "Produce an SBOM.".into(),
            },
            mappings: vec![],
        };
        let value = serde_json::to_value(&section).unwrap();
        assert_eq!(value["title"], "SBOM");
        assert_eq!(value["text"], "Produce an SBOM.");
        assert!(value["mappings"].as_array().unwrap().is_empty());
    }

    #[test]
    fn run_outcome_is_tagged() {
        let failed = RunOutcome::Failed {
            stage: Stage::Publishing,
            error: "boom".into(),
        };
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains(r#""status":"failed""#));
        assert!(json.contains(r#""stage":"publishing""#));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
