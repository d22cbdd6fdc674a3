//! Content extraction for discovered sources.
//!
//! Each source is fetched and normalized to Markdown (HTML) or page-marked
//! text (PDF). A failed extraction never aborts the batch: it becomes a short
//! placeholder document. Only a successful extraction that yields no text is
//! dropped. Every kept document is persisted to the run's `sources/` directory.

mod http;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use regbrief_artifacts::RunDir;
use regbrief_shared::{ExtractedDocument, Result, Source};

pub use http::{DocumentKind, HttpExtractor};

/// Outcome of extracting one URL. Extraction never errors past this boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Normalized text; may be empty.
    Content(String),
    /// The fetch or parse failed; carries the reason.
    Failed(String),
}

/// Fetch-and-normalize boundary.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn extract(&self, url: &str) -> Extraction;
}

/// Inline body used in place of a document whose extraction failed.
pub fn failure_placeholder(reason: &str) -> String {
    format!("_Extraction failed: {reason}_")
}

/// Extract every source with at most `concurrency` fetches in flight.
///
/// Output preserves source order. The only error is a failed artifact write.
#[instrument(skip_all, fields(sources = sources.len(), concurrency))]
pub async fn extract_all(
    extractor: &dyn Extract,
    sources: &[Source],
    run: &RunDir,
    concurrency: usize,
) -> Result<Vec<ExtractedDocument>> {
    let results: Vec<(Source, Extraction)> = stream::iter(sources.iter().cloned())
        .map(|source| async move {
            let extraction = extractor.extract(&source.url).await;
            (source, extraction)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut documents = Vec::with_capacity(results.len());
    for (source, extraction) in results {
        let content = match extraction {
            Extraction::Content(text) if text.trim().is_empty() => {
                debug!(id = %source.id, url = %source.url, "empty extraction dropped");
                continue;
            }
            Extraction::Content(text) => text,
            Extraction::Failed(reason) => {
                warn!(id = %source.id, url = %source.url, %reason, "extraction failed, keeping placeholder");
                failure_placeholder(&reason)
            }
        };

        let stored = run.write_source(&source.id, &source.title, &content)?;
        documents.push(ExtractedDocument {
            source,
            content,
            stored,
        });
    }

    info!(extracted = documents.len(), "extraction complete");
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use regbrief_artifacts::ArtifactStore;
    use regbrief_shared::{RunId, SourceOrigin};

    struct CannedExtractor(HashMap<String, Extraction>);

    #[async_trait]
    impl Extract for CannedExtractor {
        async fn extract(&self, url: &str) -> Extraction {
            self.0
                .get(url)
                .cloned()
                .unwrap_or_else(|| Extraction::Failed("unknown url".into()))
        }
    }

    fn source(n: usize) -> Source {
        Source {
            id: format!("src{n:02}"),
            url: format!("https://nist.gov/{n}"),
            title: format!("Doc {n}"),
            origin: SourceOrigin::PrimarySearch,
            published: String::new(),
        }
    }

    #[tokio::test]
    async fn failures_become_placeholders_and_empty_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path(), "artifacts", "docs/summaries");
        let run = store.open_run(&RunId::new("x1")).unwrap();

        let extractor = CannedExtractor(HashMap::from([
            ("https://nist.gov/1".to_string(), Extraction::Content("# One\n\nBody".into())),
            ("https://nist.gov/2".to_string(), Extraction::Failed("HTTP 503".into())),
            ("https://nist.gov/3".to_string(), Extraction::Content("  \n ".into())),
            ("https://nist.gov/4".to_string(), Extraction::Content("Four".into())),
        ]));
        let sources: Vec<_> = (1..=4).map(source).collect();

        let docs = extract_all(&extractor, &sources, &run, 2).await.unwrap();

        let ids: Vec<_> = docs.iter().map(|d| d.source.id.as_str()).collect();
        assert_eq!(ids, vec!["src01", "src02", "src04"]);
        assert_eq!(docs[1].content, "_Extraction failed: HTTP 503_");
        assert!(docs.iter().all(|d| !d.content.is_empty()));

        assert_eq!(docs[0].stored.path, "artifacts/x1/sources/src01-Doc_1.md");
        assert_eq!(store.read(&docs[1].stored).unwrap(), docs[1].content);

        let written = std::fs::read_dir(run.path().join("sources")).unwrap().count();
        assert_eq!(written, 3);
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let tmp = tempfile::tempdir().unwrap();
        let run = ArtifactStore::new(tmp.path(), "a", "s")
            .open_run(&RunId::new("x2"))
            .unwrap();

        let docs = extract_all(&CannedExtractor(HashMap::new()), &[], &run, 4)
            .await
            .unwrap();
        assert!(docs.is_empty());
    }
}
