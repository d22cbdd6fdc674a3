//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use regbrief_shared::{LlmConfig, RegBriefError, Result, RunConfig};

use crate::{Judge, JudgeRequest, Judgment, parse_structured};

const USER_AGENT: &str = concat!("regbrief/", env!("CARGO_PKG_VERSION"));

/// `POST {base_url}/chat/completions` with a bearer key.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleJudge {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleJudge {
    /// Build a client. A missing key is a configuration error.
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key.ok_or_else(|| {
            RegBriefError::config(format!("{} not set", config.api_key_env))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RegBriefError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Self::new(&config.llm, config.llm_api_key.clone())
    }
}

#[async_trait]
impl Judge for OpenAiCompatibleJudge {
    #[instrument(skip_all, fields(model = %self.model, structured = request.structured, payload_len = request.payload.len()))]
    async fn judge(&self, request: &JudgeRequest) -> Result<Judgment> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.instructions,
                },
                ChatMessage {
                    role: "user",
                    content: &request.payload,
                },
            ],
            temperature: self.temperature,
            response_format: request.structured.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RegBriefError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(300).collect();
            return Err(RegBriefError::Llm(format!("HTTP {status}: {detail}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RegBriefError::Llm(format!("invalid completion envelope: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        debug!(response_len = content.len(), "completion received");

        Ok(if request.structured {
            Judgment::Structured(parse_structured(&content))
        } else {
            Judgment::Text(content)
        })
    }
}
