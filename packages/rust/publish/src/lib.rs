//! Pull request publishing.
//!
//! A [`Publisher`] turns a [`PublishRequest`] into an open pull request. The
//! one implementation, [`SessionPublisher`], drives any [`RemoteSession`]
//! (GitHub MCP server or GitHub REST) through the same sequence:
//!
//! 1. discover the remote's operations and locate `create_branch`,
//!    `create_or_update_file`, and `create_pull_request` by name suffix
//! 2. create the branch from the base
//! 3. create or update every file on the branch
//! 4. open the pull request and return its URL
//!
//! A missing operation is a configuration error raised before any mutating
//! call. A failure after step 2 leaves the branch in place; nothing is rolled
//! back and nothing is retried.

mod github;
mod mcp;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, instrument};
use url::Url;

use regbrief_shared::{PublishBackend, RegBriefError, Result, RunConfig};

pub use github::GitHubRestSession;
pub use mcp::McpSession;

const USER_AGENT: &str = concat!("regbrief/", env!("CARGO_PKG_VERSION"));

const CREATE_BRANCH: &str = "create_branch";
const UPSERT_FILE: &str = "create_or_update_file";
const CREATE_PULL_REQUEST: &str = "create_pull_request";

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// Everything needed to open one pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub branch: String,
    pub title: String,
    pub body: String,
    /// Repository path → file content, committed in path order.
    pub files: BTreeMap<String, String>,
    /// Defaults to `title` when `None`.
    pub commit_message: Option<String>,
    pub base: String,
}

/// Opens a pull request and returns its URL.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> Result<String>;
}

/// A connection to a remote that exposes named operations.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Names of every operation the remote offers (possibly namespaced).
    async fn list_operations(&self) -> Result<Vec<String>>;

    /// Invoke one operation with JSON arguments.
    async fn call(&self, operation: &str, args: Value) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Repository slug
// ---------------------------------------------------------------------------

/// `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn parse(slug: &str) -> Result<Self> {
        match slug.trim().split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(RegBriefError::config(
                "publish repo (GITHUB_REPO) must be set as 'owner/repo'",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionPublisher
// ---------------------------------------------------------------------------

/// Operation names resolved against a remote's catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequiredOperations {
    create_branch: String,
    upsert_file: String,
    create_pull_request: String,
}

impl RequiredOperations {
    fn resolve(available: &[String]) -> Result<Self> {
        let find = |suffix: &str| available.iter().find(|name| name.ends_with(suffix)).cloned();

        match (find(CREATE_BRANCH), find(UPSERT_FILE), find(CREATE_PULL_REQUEST)) {
            (Some(create_branch), Some(upsert_file), Some(create_pull_request)) => Ok(Self {
                create_branch,
                upsert_file,
                create_pull_request,
            }),
            _ => {
                let mut names: Vec<&str> = available.iter().map(String::as_str).collect();
                names.sort_unstable();
                let listed = if names.is_empty() {
                    "(no operations reported)".to_string()
                } else {
                    names.join(", ")
                };
                Err(RegBriefError::config(format!(
                    "required publish operations not found. Needed: {CREATE_BRANCH}, \
                     {UPSERT_FILE}, {CREATE_PULL_REQUEST}. Available: {listed}"
                )))
            }
        }
    }
}

/// [`Publisher`] over any [`RemoteSession`].
pub struct SessionPublisher<S> {
    session: S,
    repo: RepoSlug,
}

impl<S: RemoteSession> SessionPublisher<S> {
    pub fn new(session: S, repo: RepoSlug) -> Self {
        Self { session, repo }
    }
}

#[async_trait]
impl<S: RemoteSession> Publisher for SessionPublisher<S> {
    #[instrument(skip_all, fields(branch = %request.branch, base = %request.base, files = request.files.len()))]
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        let available = self.session.list_operations().await?;
        let ops = RequiredOperations::resolve(&available)?;

        let owner = &self.repo.owner;
        let repo = &self.repo.repo;
        let message = request.commit_message.as_deref().unwrap_or(&request.title);

        self.session
            .call(
                &ops.create_branch,
                json!({
                    "owner": owner,
                    "repo": repo,
                    "branch": request.branch,
                    "from_branch": request.base,
                }),
            )
            .await?;
        info!("branch created");

        for (path, content) in &request.files {
            self.session
                .call(
                    &ops.upsert_file,
                    json!({
                        "owner": owner,
                        "repo": repo,
                        "branch": request.branch,
                        "path": path,
                        "content": content,
                        "message": message,
                    }),
                )
                .await?;
        }
        info!("files committed");

        let pr = self
            .session
            .call(
                &ops.create_pull_request,
                json!({
                    "owner": owner,
                    "repo": repo,
                    "title": request.title,
                    "body": request.body,
                    "base": request.base,
                    "head": request.branch,
                    "draft": false,
                }),
            )
            .await?;

        let url = pr_url(&pr);
        info!(pr_url = %url, "pull request opened");
        Ok(url)
    }
}

/// `html_url`, else `url`, else the raw result as text.
pub fn pr_url(result: &Value) -> String {
    for key in ["html_url", "url"] {
        if let Some(url) = result.get(key).and_then(Value::as_str) {
            if !url.is_empty() {
                return url.to_string();
            }
        }
    }

    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Construction from config
// ---------------------------------------------------------------------------

/// Validate the publish configuration and build the configured backend.
///
/// Performs no network I/O; the remote is first contacted by `publish`.
pub fn from_config(config: &RunConfig) -> Result<Box<dyn Publisher>> {
    let publish = &config.publish;
    let repo = RepoSlug::parse(&publish.repo)?;
    let token = config.publish_token.clone().ok_or_else(|| {
        RegBriefError::config(format!(
            "{} must be set to a GitHub token with repo write access",
            publish.token_env
        ))
    })?;
    let timeout = Duration::from_secs(publish.timeout_secs);

    match publish.backend {
        PublishBackend::Mcp => {
            let endpoint = parse_endpoint(&publish.mcp_url, "publish.mcp_url (MCP_GITHUB_URL)")?;
            let session = McpSession::new(endpoint, token, timeout)?;
            Ok(Box::new(SessionPublisher::new(session, repo)))
        }
        PublishBackend::Github => {
            let endpoint = parse_endpoint(&publish.github_api_url, "publish.github_api_url")?;
            let session = GitHubRestSession::new(endpoint, token, timeout)?;
            Ok(Box::new(SessionPublisher::new(session, repo)))
        }
    }
}

fn parse_endpoint(raw: &str, name: &str) -> Result<Url> {
    if raw.trim().is_empty() {
        return Err(RegBriefError::config(format!("{name} must be set")));
    }
    Url::parse(raw.trim()).map_err(|e| RegBriefError::config(format!("{name} is not a valid URL: {e}")))
}
