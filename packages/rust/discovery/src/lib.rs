//! Source discovery for regbrief runs.
//!
//! Queries a search provider for candidate documents about a topic, restricted
//! to the configured primary domains. When the primary search yields nothing
//! (including when no provider credential is configured), a narrower fallback
//! query is issued exactly once. Results are deduplicated by URL with the
//! fragment stripped, capped at the requested limit, and numbered `src01`,
//! `src02`, ... in final order.

mod serpapi;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use url::Url;

use regbrief_shared::{RegBriefError, Result, Source, SourceOrigin};

pub use serpapi::SerpApiSearch;

/// User-Agent string for outbound search requests.
const USER_AGENT: &str = concat!("regbrief/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Search provider boundary
// ---------------------------------------------------------------------------

/// A single search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    /// Number of results requested.
    pub num: usize,
}

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    /// Publication date when the provider knows it, otherwise the snippet.
    pub date_or_snippet: String,
}

/// Anything that can answer a [`SearchQuery`].
///
/// Implementations return an empty list when they have no credential; only a
/// failed call is an error.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}

// ---------------------------------------------------------------------------
// Discovery options
// ---------------------------------------------------------------------------

/// Configuration for the discovery process.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Domains OR-ed into the primary query.
    pub primary_domains: Vec<String>,
    /// Query issued when the primary search returns nothing.
    pub fallback_query: String,
    /// Maximum number of sources returned.
    pub limit: usize,
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Discover candidate sources for `topic`.
///
/// Never fails for "no results"; returns an error only when a search call
/// itself fails.
#[instrument(skip_all, fields(topic = %topic, limit = opts.limit))]
pub async fn discover(
    provider: &dyn SearchProvider,
    topic: &str,
    opts: &DiscoveryOptions,
) -> Result<Vec<Source>> {
    if opts.limit == 0 {
        return Err(RegBriefError::validation("limit must be greater than zero"));
    }

    let primary = SearchQuery {
        query: primary_query(topic, &opts.primary_domains),
        num: opts.limit,
    };
    info!(query = %primary.query, "primary search");

    let mut hits: Vec<(SearchHit, SourceOrigin)> = provider
        .search(&primary)
        .await?
        .into_iter()
        .map(|hit| (hit, SourceOrigin::PrimarySearch))
        .collect();

    if hits.is_empty() {
        let fallback = SearchQuery {
            query: opts.fallback_query.clone(),
            num: opts.limit,
        };
        info!(query = %fallback.query, "primary search empty, issuing fallback");

        hits.extend(
            provider
                .search(&fallback)
                .await?
                .into_iter()
                .map(|hit| (hit, SourceOrigin::FallbackSearch)),
        );
    }

    let sources = build_sources(hits, opts.limit);
    info!(found = sources.len(), "discovery complete");
    Ok(sources)
}

/// `<topic> site:<d1> OR site:<d2> ...`
pub fn primary_query(topic: &str, domains: &[String]) -> String {
    let sites = domains
        .iter()
        .map(|d| format!("site:{d}"))
        .collect::<Vec<_>>()
        .join(" OR ");

    if sites.is_empty() {
        topic.trim().to_string()
    } else {
        format!("{} {sites}", topic.trim())
    }
}

/// Strip the fragment from a URL for deduplication.
///
/// Unparseable URLs fall back to cutting at the first `#`.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.split('#').next().unwrap_or_default().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Dedupe (first-seen wins), cap, and number the hits.
fn build_sources(hits: Vec<(SearchHit, SourceOrigin)>, limit: usize) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();

    for (hit, origin) in hits {
        if hit.url.trim().is_empty() {
            debug!(title = %hit.title, "skipping hit without URL");
            continue;
        }

        let url = normalize_url(&hit.url);
        if !seen.insert(url.clone()) {
            debug!(%url, "duplicate hit dropped");
            continue;
        }

        sources.push(Source {
            id: format!("src{:02}", sources.len() + 1),
            url,
            title: hit.title,
            origin,
            published: hit.date_or_snippet,
        });

        if sources.len() == limit {
            break;
        }
    }

    sources
}
