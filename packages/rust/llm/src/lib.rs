//! Delegated judgment boundary.
//!
//! Relevance filtering, control mapping, and summarization all go through one
//! narrow capability: [`Judge::judge`] takes fixed instructions plus a payload
//! and returns either a parsed JSON object or raw text. A malformed structured
//! response degrades to an empty object; only transport and API failures are
//! errors.

mod openai;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use regbrief_shared::Result;

pub use openai::OpenAiCompatibleJudge;

/// One delegated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeRequest {
    /// Fixed system instructions for the call site.
    pub instructions: String,
    /// User payload (document text, section text, or grounding JSON).
    pub payload: String,
    /// Ask for a JSON object instead of free text.
    pub structured: bool,
}

impl JudgeRequest {
    pub fn structured(instructions: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            payload: payload.into(),
            structured: true,
        }
    }

    pub fn text(instructions: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            payload: payload.into(),
            structured: false,
        }
    }
}

/// The response of a delegated call.
#[derive(Debug, Clone, PartialEq)]
pub enum Judgment {
    Structured(Value),
    Text(String),
}

impl Judgment {
    /// Decode a structured response into `T`, falling back to `T::default()`
    /// when the shape does not match. Text responses are parsed first.
    pub fn decode<T: DeserializeOwned + Default>(self) -> T {
        let value = match self {
            Self::Structured(value) => value,
            Self::Text(text) => parse_structured(&text),
        };

        match serde_json::from_value(value) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "structured response did not match schema, using default");
                T::default()
            }
        }
    }

    /// The raw text of the response. Structured responses are re-serialized.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// Anything that can answer a [`JudgeRequest`].
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest) -> Result<Judgment>;
}

/// Parse model output as JSON; non-JSON degrades to `{}`.
pub fn parse_structured(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, len = raw.len(), "non-JSON structured response, using {{}}");
            Value::Object(Default::default())
        }
    }
}
