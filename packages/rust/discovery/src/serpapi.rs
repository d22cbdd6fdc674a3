//! SerpAPI-backed [`SearchProvider`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use regbrief_shared::{RegBriefError, Result, RunConfig, SearchConfig};

use crate::{SearchHit, SearchProvider, SearchQuery, USER_AGENT};

/// Google results via `serpapi.com/search.json`.
#[derive(Debug, Clone)]
pub struct SerpApiSearch {
    client: Client,
    endpoint: String,
    engine: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

impl SerpApiSearch {
    /// Build a client. A `None` key is allowed; every search then returns nothing.
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RegBriefError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            engine: config.engine.clone(),
            api_key,
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Self::new(&config.search, config.search_api_key.clone())
    }
}

#[async_trait]
impl SearchProvider for SerpApiSearch {
    #[instrument(skip_all, fields(num = query.num))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("no search API key configured, returning no results");
            return Ok(Vec::new());
        };

        let num = query.num.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query.query.as_str()),
                ("engine", self.engine.as_str()),
                ("num", num.as_str()),
                ("api_key", api_key),
            ])
            .send()
            .await
            .map_err(|e| RegBriefError::Network(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegBriefError::Network(format!("search: HTTP {status}")));
        }

        let body: SerpResponse = response
            .json()
            .await
            .map_err(|e| RegBriefError::parse(format!("search response: {e}")))?;

        if let Some(error) = &body.error {
            // "no results" is reported through this field with a 200 status
            warn!(%error, "search provider reported an error");
        }

        let hits: Vec<SearchHit> = body
            .organic_results
            .into_iter()
            .filter(|r| !r.link.is_empty() && !r.title.trim().is_empty())
            .map(|r| SearchHit {
                url: r.link,
                title: r.title,
                date_or_snippet: r.date.or(r.snippet).unwrap_or_default(),
            })
            .collect();

        debug!(hits = hits.len(), "search returned");
        Ok(hits)
    }
}
