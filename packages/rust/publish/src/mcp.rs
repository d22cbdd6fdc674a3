//! GitHub MCP server session over streamable HTTP (JSON-RPC 2.0).
//!
//! The session is opened lazily: the first request sends `initialize`, keeps
//! the `Mcp-Session-Id` the server hands back, and acknowledges with
//! `notifications/initialized`. Responses may arrive as plain JSON or as a
//! server-sent event stream; both are accepted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Response};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;

use regbrief_shared::{RegBriefError, Result};

use crate::{RemoteSession, USER_AGENT};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";
/// Upper bound on `tools/list` pages.
const MAX_TOOL_PAGES: usize = 50;

/// A streamable-HTTP MCP client with bearer authentication.
#[derive(Debug)]
pub struct McpSession {
    client: Client,
    endpoint: Url,
    token: String,
    next_id: AtomicU64,
    /// Server-assigned session id (may be absent for stateless servers).
    session_id: OnceCell<Option<String>>,
}

impl McpSession {
    pub fn new(endpoint: Url, token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RegBriefError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            token,
            next_id: AtomicU64::new(1),
            session_id: OnceCell::new(),
        })
    }

    /// Run the `initialize` handshake once per session.
    async fn session_id(&self) -> Result<Option<&str>> {
        let id = self
            .session_id
            .get_or_try_init(|| async {
                let params = json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "regbrief", "version": env!("CARGO_PKG_VERSION") },
                });
                let body = self.request_body("initialize", params);
                let init_id = body["id"].as_u64().unwrap_or_default();
                let response = self.post(&body, None).await?;
                let session = response
                    .headers()
                    .get(SESSION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let result = read_rpc_result(response, init_id).await?;
                let server = result
                    .pointer("/serverInfo/name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown");
                debug!(
                    server,
                    session = session.is_some(),
                    "MCP session initialized"
                );

                let notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
                let ack = self.post(&notification, session.as_deref()).await?;
                if !ack.status().is_success() {
                    return Err(RegBriefError::Publish(format!(
                        "MCP initialized notification rejected: HTTP {}",
                        ack.status()
                    )));
                }

                Ok::<_, RegBriefError>(session)
            })
            .await?;

        Ok(id.as_deref())
    }

    fn request_body(&self, method: &str, params: Value) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    async fn post(&self, body: &Value, session: Option<&str>) -> Result<Response> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            "application/json, text/event-stream"
                .parse()
                .map_err(|_| RegBriefError::Publish("invalid accept header".into()))?,
        );
        if let Some(session) = session {
            headers.insert(
                SESSION_HEADER,
                session
                    .parse()
                    .map_err(|_| RegBriefError::Publish("invalid MCP session id".into()))?,
            );
        }

        self.client
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| RegBriefError::Publish(format!("MCP request failed: {e}")))
    }

    /// Send one JSON-RPC request inside the session and return its `result`.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let session = self.session_id().await?;
        let body = self.request_body(method, params);
        let id = body["id"].as_u64().unwrap_or_default();
        let response = self.post(&body, session).await?;
        read_rpc_result(response, id).await
    }
}

#[async_trait]
impl RemoteSession for McpSession {
    #[instrument(skip_all)]
    async fn list_operations(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.rpc("tools/list", params).await?;

            if let Some(tools) = result.get("tools").and_then(Value::as_array) {
                names.extend(
                    tools
                        .iter()
                        .filter_map(|t| t.get("name").and_then(Value::as_str))
                        .filter(|n| !n.is_empty())
                        .map(str::to_string),
                );
            }

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            match &cursor {
                Some(next) if seen_cursors.insert(next.clone()) => {}
                Some(next) => {
                    warn!(cursor = %next, "MCP server repeated a tools/list cursor");
                    break;
                }
                None => break,
            }
        }

        debug!(tools = names.len(), "MCP tools listed");
        Ok(names)
    }

    #[instrument(skip(self, args))]
    async fn call(&self, operation: &str, args: Value) -> Result<Value> {
        let result = self
            .rpc("tools/call", json!({ "name": operation, "arguments": args }))
            .await?;
        tool_output(operation, &result)
    }
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

/// Read a JSON-RPC response (JSON or SSE) and return the `result` for `id`.
async fn read_rpc_result(response: Response, id: u64) -> Result<Value> {
    let status = response.status();
    let declared_sse = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));
    let text = response
        .text()
        .await
        .map_err(|e| RegBriefError::Publish(format!("MCP response read failed: {e}")))?;
    let is_sse = declared_sse || looks_like_sse(&text);

    if !status.is_success() {
        let detail: String = text.chars().take(300).collect();
        return Err(RegBriefError::Publish(format!("MCP HTTP {status}: {detail}")));
    }

    let messages: Vec<Value> = if is_sse {
        sse_data(&text)
            .filter_map(|data| serde_json::from_str(data).ok())
            .collect()
    } else {
        vec![serde_json::from_str(&text)
            .map_err(|e| RegBriefError::Publish(format!("MCP response is not JSON: {e}")))?]
    };

    let message = messages
        .into_iter()
        .find(|m| m.get("id").and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| RegBriefError::Publish(format!("MCP response for request {id} missing")))?;

    if let Some(error) = message.get("error") {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(RegBriefError::Publish(format!("MCP error: {text}")));
    }

    Ok(message.get("result").cloned().unwrap_or(Value::Null))
}

/// Event-stream bodies served under a non-SSE content type.
fn looks_like_sse(body: &str) -> bool {
    let head = body.trim_start();
    head.starts_with("event:") || head.starts_with("data:")
}

/// `data:` payloads of a server-sent event stream, one per event.
fn sse_data(stream: &str) -> impl Iterator<Item = &str> {
    stream
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
}

/// Turn a `tools/call` result into a value.
///
/// Prefers `structuredContent`; otherwise the first content item, with text
/// parsed as JSON when it is JSON. A result flagged `isError` is an error.
fn tool_output(operation: &str, result: &Value) -> Result<Value> {
    let first = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first());
    let first_text = first.and_then(|c| c.get("text")).and_then(Value::as_str);

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        return Err(RegBriefError::Publish(format!(
            "{operation} failed: {}",
            first_text.unwrap_or("no details")
        )));
    }

    if let Some(structured) = result.get("structuredContent") {
        return Ok(structured.clone());
    }

    let Some(item) = first else {
        return Ok(Value::Null);
    };

    match item.get("type").and_then(Value::as_str) {
        Some("text") => {
            let text = first_text.unwrap_or_default();
            Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
        }
        Some("json") => Ok(item.get("data").cloned().unwrap_or(Value::Null)),
        _ => Ok(item.clone()),
    }
}
