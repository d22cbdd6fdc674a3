//! Deterministic collaborators for core tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use regbrief_discovery::{SearchHit, SearchProvider, SearchQuery};
use regbrief_extractor::{Extract, Extraction};
use regbrief_llm::{Judge, JudgeRequest, Judgment};
use regbrief_publish::{PublishRequest, Publisher};
use regbrief_shared::{
    ExtractedDocument, RegBriefError, Result, Source, SourceOrigin, StoredArtifact,
};

type JudgeFn = dyn Fn(&JudgeRequest) -> Result<Judgment> + Send + Sync;

/// A judge backed by a closure; counts its calls.
pub struct FnJudge {
    respond: Box<JudgeFn>,
    calls: AtomicUsize,
}

impl FnJudge {
    pub fn new(respond: impl Fn(&JudgeRequest) -> Result<Judgment> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Judge for FnJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<Judgment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(request)
    }
}

/// An extracted document that was never written to disk.
pub fn document(id: &str, content: &str) -> ExtractedDocument {
    ExtractedDocument {
        source: Source {
            id: id.to_string(),
            url: format!("https://csrc.nist.gov/pubs/{id}"),
            title: format!("Publication {id}"),
            origin: SourceOrigin::PrimarySearch,
            published: "2026-01-15".to_string(),
        },
        content: content.to_string(),
        stored: StoredArtifact {
            path: format!("artifacts/test/sources/{id}.md"),
            sha256: String::new(),
            size_bytes: content.len(),
        },
    }
}

/// Returns the same hits for every query and records the queries.
pub struct FakeSearch {
    hits: Vec<SearchHit>,
    pub queries: Mutex<Vec<SearchQuery>>,
}

impl FakeSearch {
    pub fn new(urls: &[&str]) -> Self {
        let hits = urls
            .iter()
            .enumerate()
            .map(|(i, url)| SearchHit {
                url: url.to_string(),
                title: format!("Result {}", i + 1),
                date_or_snippet: "Jan 15, 2026".to_string(),
            })
            .collect();
        Self {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.clone());
        }
        Ok(self.hits.clone())
    }
}

/// Canned extraction per URL; unknown URLs yield `Content` echoing the URL.
pub struct FakeExtractor(pub HashMap<String, Extraction>);

#[async_trait]
impl Extract for FakeExtractor {
    async fn extract(&self, url: &str) -> Extraction {
        self.0
            .get(url)
            .cloned()
            .unwrap_or_else(|| Extraction::Content(format!("# {url}\n\nBody of {url}\n")))
    }
}

/// Records publish requests; fails when built with an error message.
///
/// Clones share the request log, so a test can keep one and hand the other
/// to the orchestrator.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    requests: Arc<Mutex<Vec<PublishRequest>>>,
    fail_with: Option<String>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<PublishRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        match &self.fail_with {
            Some(message) => Err(RegBriefError::Publish(message.clone())),
            None => Ok("https://github.com/acme/compliance/pull/42".to_string()),
        }
    }
}
