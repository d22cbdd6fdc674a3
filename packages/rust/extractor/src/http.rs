//! HTTP-backed extractor for HTML pages and PDF documents.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};
use url::Url;

use regbrief_markdown::{ConvertOptions, convert, pdf_pages_to_markdown};
use regbrief_shared::{RegBriefError, Result, RunConfig};

use crate::{Extract, Extraction};

/// Maximum response size we accept (50 MB).
const MAX_RESPONSE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

const USER_AGENT: &str = concat!("regbrief/", env!("CARGO_PKG_VERSION"));

/// How a fetched document is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Html,
}

impl DocumentKind {
    /// Classify by URL path suffix (`.pdf`, case-insensitive, query ignored).
    pub fn from_url(url: &str) -> Self {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_ascii_lowercase(),
            Err(_) => url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase(),
        };

        if path.ends_with(".pdf") {
            Self::Pdf
        } else {
            Self::Html
        }
    }
}

/// Fetches over HTTP and converts with `regbrief-markdown` / `pdf-extract`.
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    client: Client,
}

impl HttpExtractor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| RegBriefError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Self::new(config.fetch_timeout)
    }

    #[instrument(skip(self))]
    async fn fetch_document(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RegBriefError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegBriefError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(RegBriefError::validation(format!(
                    "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
                )));
            }
        }

        let served_pdf = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/pdf"));

        let kind = if served_pdf {
            DocumentKind::Pdf
        } else {
            DocumentKind::from_url(url)
        };
        debug!(?kind, "fetched");

        match kind {
            DocumentKind::Pdf => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| RegBriefError::Network(format!("{url}: body read failed: {e}")))?;
                pdf_to_markdown(bytes.to_vec()).await
            }
            DocumentKind::Html => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| RegBriefError::Network(format!("{url}: body read failed: {e}")))?;
                convert(
                    &body,
                    &ConvertOptions {
                        source_url: url.to_string(),
                    },
                )
            }
        }
    }
}

#[async_trait]
impl Extract for HttpExtractor {
    async fn extract(&self, url: &str) -> Extraction {
        match self.fetch_document(url).await {
            Ok(content) => Extraction::Content(content),
            Err(e) => Extraction::Failed(e.to_string()),
        }
    }
}

/// Parse PDF bytes page by page off the async runtime.
async fn pdf_to_markdown(bytes: Vec<u8>) -> Result<String> {
    let pages = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
    })
    .await
    .map_err(|e| RegBriefError::Conversion(format!("PDF parser task failed: {e}")))?
    .map_err(|e| RegBriefError::Conversion(format!("PDF parsing failed: {e}")))?;

    debug!(pages = pages.len(), "PDF parsed");
    Ok(pdf_pages_to_markdown(&pages))
}
