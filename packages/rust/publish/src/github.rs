//! GitHub REST API session.
//!
//! Exposes the three publish operations under a `github/` namespace so the
//! same suffix resolution applies as for MCP tool names.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use regbrief_shared::{RegBriefError, Result};

use crate::{CREATE_BRANCH, CREATE_PULL_REQUEST, RemoteSession, UPSERT_FILE, USER_AGENT};

const API_VERSION: &str = "2022-11-28";

/// Direct REST calls against `api.github.com` (or a GHES base URL).
#[derive(Debug, Clone)]
pub struct GitHubRestSession {
    client: Client,
    api_base: String,
    token: String,
}

impl GitHubRestSession {
    pub fn new(api_base: Url, token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RegBriefError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.as_str().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn repo_url(&self, args: &Value, rest: &str) -> Result<String> {
        Ok(format!(
            "{}/repos/{}/{}/{rest}",
            self.api_base,
            arg(args, "owner")?,
            arg(args, "repo")?
        ))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", API_VERSION)
            .send()
            .await
            .map_err(|e| RegBriefError::Publish(format!("GitHub request failed: {e}")))
    }

    async fn create_branch(&self, args: &Value) -> Result<Value> {
        let from = arg(args, "from_branch")?;
        let base_ref = self.repo_url(args, &format!("git/ref/heads/{from}"))?;
        let base = json_body(self.send(self.client.get(base_ref)).await?).await?;
        let sha = base
            .pointer("/object/sha")
            .and_then(Value::as_str)
            .ok_or_else(|| RegBriefError::Publish(format!("base branch {from} has no commit sha")))?;

        let refs = self.repo_url(args, "git/refs")?;
        let body = json!({ "ref": format!("refs/heads/{}", arg(args, "branch")?), "sha": sha });
        json_body(self.send(self.client.post(refs).json(&body)).await?).await
    }

    async fn create_or_update_file(&self, args: &Value) -> Result<Value> {
        let branch = arg(args, "branch")?;
        let contents = self.repo_url(args, &format!("contents/{}", arg(args, "path")?))?;

        // Existing files must be updated with their current blob sha
        let existing = self
            .send(self.client.get(&contents).query(&[("ref", branch)]))
            .await?;
        let sha = if existing.status() == StatusCode::NOT_FOUND {
            None
        } else {
            json_body(existing)
                .await?
                .get("sha")
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let mut body = json!({
            "message": arg(args, "message")?,
            "content": STANDARD.encode(arg(args, "content")?),
            "branch": branch,
        });
        if let Some(sha) = sha {
            body["sha"] = Value::String(sha);
        }

        json_body(self.send(self.client.put(&contents).json(&body)).await?).await
    }

    async fn create_pull_request(&self, args: &Value) -> Result<Value> {
        let pulls = self.repo_url(args, "pulls")?;
        let body = json!({
            "title": arg(args, "title")?,
            "body": arg(args, "body")?,
            "head": arg(args, "head")?,
            "base": arg(args, "base")?,
            "draft": args.get("draft").and_then(Value::as_bool).unwrap_or(false),
        });
        json_body(self.send(self.client.post(pulls).json(&body)).await?).await
    }
}

#[async_trait]
impl RemoteSession for GitHubRestSession {
    async fn list_operations(&self) -> Result<Vec<String>> {
        Ok([CREATE_BRANCH, UPSERT_FILE, CREATE_PULL_REQUEST]
            .iter()
            .map(|op| format!("github/{op}"))
            .collect())
    }

    #[instrument(skip(self, args))]
    async fn call(&self, operation: &str, args: Value) -> Result<Value> {
        let result = if operation.ends_with(CREATE_BRANCH) {
            self.create_branch(&args).await
        } else if operation.ends_with(UPSERT_FILE) {
            self.create_or_update_file(&args).await
        } else if operation.ends_with(CREATE_PULL_REQUEST) {
            self.create_pull_request(&args).await
        } else {
            Err(RegBriefError::Publish(format!("unsupported GitHub operation: {operation}")))
        };

        debug!(ok = result.is_ok(), "GitHub operation finished");
        result
    }
}

fn arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RegBriefError::Publish(format!("missing argument: {key}")))
}

async fn json_body(response: Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| RegBriefError::Publish(format!("GitHub response read failed: {e}")))?;

    if !status.is_success() {
        let detail: String = text.chars().take(300).collect();
        return Err(RegBriefError::Publish(format!("GitHub HTTP {status}: {detail}")));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| RegBriefError::Publish(format!("GitHub response is not JSON: {e}")))
}
