//! Filesystem-backed artifact store for regbrief runs.
//!
//! Owns every naming convention and directory the pipeline writes to:
//!
//! ```text
//! <root>/
//! ├── <artifacts_dir>/<run_id>/
//! │   ├── run.json
//! │   └── sources/
//! │       ├── src01-<title>.md
//! │       └── ...
//! └── <summaries_dir>/
//!     └── <date>-<topic-slug>-summary.md
//! ```
//!
//! All writes go to a temp file first and are renamed into place. Paths handed
//! back in [`StoredArtifact`] are root-relative and `/`-separated so they can
//! be used verbatim as repository paths.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use regbrief_shared::{RegBriefError, Result, RunConfig, RunId, RunRecord, StoredArtifact};

/// Longest title prefix (in characters) used in a source filename.
const TITLE_FILENAME_CHARS: usize = 80;

const SOURCES_DIR: &str = "sources";
const RECORD_FILE: &str = "run.json";

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Root of everything a run writes.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    artifacts_dir: String,
    summaries_dir: String,
}

impl ArtifactStore {
    pub fn new(
        root: impl Into<PathBuf>,
        artifacts_dir: impl Into<String>,
        summaries_dir: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            artifacts_dir: trim_slashes(&artifacts_dir.into()),
            summaries_dir: trim_slashes(&summaries_dir.into()),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            config.output_root.clone(),
            config.artifacts_dir.clone(),
            config.summaries_dir.clone(),
        )
    }

    /// Create the run-scoped directory (`<artifacts_dir>/<run_id>/sources`).
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn open_run(&self, run_id: &RunId) -> Result<RunDir> {
        let rel_dir = format!("{}/{}", self.artifacts_dir, run_id);
        let sources = self.root.join(&rel_dir).join(SOURCES_DIR);
        std::fs::create_dir_all(&sources).map_err(|e| RegBriefError::io(&sources, e))?;

        debug!(path = %sources.display(), "run directory created");

        Ok(RunDir {
            root: self.root.clone(),
            rel_dir,
        })
    }

    /// Repository-relative path of the summary file for a run.
    pub fn summary_path(&self, filename: &str) -> String {
        format!("{}/{}", self.summaries_dir, safe_filename(filename))
    }

    /// Write (or overwrite) the summary brief.
    pub fn write_summary(&self, filename: &str, content: &str) -> Result<StoredArtifact> {
        write_file(&self.root, &self.summary_path(filename), content)
    }

    /// Read back a previously stored artifact.
    pub fn read(&self, artifact: &StoredArtifact) -> Result<String> {
        let path = self.root.join(&artifact.path);
        std::fs::read_to_string(&path).map_err(|e| RegBriefError::io(&path, e))
    }
}

// ---------------------------------------------------------------------------
// RunDir
// ---------------------------------------------------------------------------

/// Handle to one run's artifact directory.
#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
    rel_dir: String,
}

impl RunDir {
    /// Absolute path of the run directory.
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.rel_dir)
    }

    /// Persist one source's raw extracted text.
    pub fn write_source(&self, source_id: &str, title: &str, content: &str) -> Result<StoredArtifact> {
        let rel = format!(
            "{}/{}/{}",
            self.rel_dir,
            SOURCES_DIR,
            source_filename(source_id, title)
        );
        write_file(&self.root, &rel, content)
    }

    /// Persist the run record as pretty-printed `run.json`.
    pub fn write_record(&self, record: &RunRecord) -> Result<StoredArtifact> {
        let json = serde_json::to_string_pretty(record).map_err(|e| {
            RegBriefError::validation(format!("JSON serialization failed: {e}"))
        })?;
        write_file(&self.root, &format!("{}/{RECORD_FILE}", self.rel_dir), &json)
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Replace every run of characters outside `[A-Za-z0-9._-]` with `_`.
///
/// Leading/trailing underscores are trimmed; an empty result becomes `file`.
pub fn safe_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<id>-<title truncated to 80 chars>.md`, made filesystem-safe.
pub fn source_filename(source_id: &str, title: &str) -> String {
    let short: String = title.chars().take(TITLE_FILENAME_CHARS).collect();
    safe_filename(&format!("{source_id}-{short}.md"))
}

/// Lowercase ASCII slug (`NIST SP 800 updates` → `nist-sp-800-updates`).
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "brief".to_string()
    } else {
        slug.to_string()
    }
}

/// `<date>-<topic-slug>-summary.md`.
pub fn summary_filename(date: NaiveDate, topic: &str) -> String {
    format!("{date}-{}-summary.md", slugify(topic))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write `content` to `<root>/<rel>` via temp file + rename.
fn write_file(root: &Path, rel: &str, content: &str) -> Result<StoredArtifact> {
    let target = root.join(rel);
    let parent = target
        .parent()
        .ok_or_else(|| RegBriefError::validation(format!("artifact path has no parent: {rel}")))?;
    std::fs::create_dir_all(parent).map_err(|e| RegBriefError::io(parent, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| RegBriefError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| RegBriefError::io(&target, e))?;

    debug!(path = %rel, size = content.len(), "wrote artifact");

    Ok(StoredArtifact {
        path: rel.to_string(),
        sha256: sha256_hex(content),
        size_bytes: content.len(),
    })
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn trim_slashes(s: &str) -> String {
    s.replace('\\', "/").trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use regbrief_shared::{RunOutcome, Source, SourceOrigin};

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir, "artifacts", "docs/summaries")
    }

    #[test]
    fn safe_filename_replaces_unsafe_runs() {
        assert_eq!(safe_filename("src01-SP 800-53 Rev. 5: Update.md"), "src01-SP_800-53_Rev._5_Update.md");
        assert_eq!(safe_filename("///"), "file");
        assert_eq!(safe_filename("  a  "), "a");
    }

    #[test]
    fn source_filename_truncates_title() {
        let title = "x".repeat(200);
        let name = source_filename("src02", &title);
        assert_eq!(name, format!("src02-{}.md", "x".repeat(80)));
    }

    #[test]
    fn slugify_topic() {
        assert_eq!(slugify("NIST SP 800 updates"), "nist-sp-800-updates");
        assert_eq!(slugify("  --  "), "brief");
        assert_eq!(slugify("SSDF / SBOM"), "ssdf-sbom");
    }

    #[test]
    fn summary_filename_is_dated() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(
            summary_filename(date, "NIST SP 800 updates"),
            "2025-03-14-nist-sp-800-updates-summary.md"
        );
    }

    #[test]
    fn open_run_creates_sources_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let run = store(tmp.path()).open_run(&RunId::new("abcd1234")).unwrap();
        assert!(run.path().join("sources").is_dir());
        assert!(run.path().ends_with("artifacts/abcd1234"));
    }

    #[test]
    fn write_source_returns_relative_path_and_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let run = store.open_run(&RunId::new("r1")).unwrap();

        let stored = run.write_source("src01", "SP 800-218", "hello world").unwrap();
        assert_eq!(stored.path, "artifacts/r1/sources/src01-SP_800-218.md");
        assert_eq!(
            stored.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(stored.size_bytes, 11);
        assert_eq!(store.read(&stored).unwrap(), "hello world");

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(run.path().join("sources"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_summary_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        store.write_summary("2025-01-01-x-summary.md", "first").unwrap();
        let stored = store.write_summary("2025-01-01-x-summary.md", "second").unwrap();

        assert_eq!(stored.path, "docs/summaries/2025-01-01-x-summary.md");
        assert_eq!(store.read(&stored).unwrap(), "second");
    }

    #[test]
    fn write_record_serializes_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let run_id = RunId::new("r2");
        let run = store.open_run(&run_id).unwrap();

        let record = RunRecord {
            run_id,
            date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            topic: "t".into(),
            dry_run: true,
            sources: vec![Source {
                id: "src01".into(),
                url: "https://csrc.nist.gov/pubs".into(),
                title: "Pubs".into(),
                origin: SourceOrigin::PrimarySearch,
                published: String::new(),
            }],
            summary_path: None,
            pr_url: None,
            artifacts: vec![],
            outcome: RunOutcome::Completed,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let stored = run.write_record(&record).unwrap();
        assert_eq!(stored.path, "artifacts/r2/run.json");

        let parsed: RunRecord = serde_json::from_str(&store.read(&stored).unwrap()).unwrap();
        assert_eq!(parsed.sources.len(), 1);
        assert_eq!(parsed.outcome, RunOutcome::Completed);
    }

    #[test]
    fn layout_dirs_are_normalized() {
        let store = ArtifactStore::new("/tmp/x", "/artifacts/", "docs\\summaries");
        assert_eq!(store.summary_path("a.md"), "docs/summaries/a.md");
    }
}
