//! Error types for regbrief.
//!
//! Library crates use [`RegBriefError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::Stage;

/// Top-level error type for all regbrief operations.
#[derive(Debug, thiserror::Error)]
pub enum RegBriefError {
    /// Missing credential/endpoint or invalid configuration. Never retried.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error at the search, fetch, model, or publish boundary.
    #[error("network error: {0}")]
    Network(String),

    /// Response or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML/PDF-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Delegated model call failed (transport or API error).
    #[error("llm error: {0}")]
    Llm(String),

    /// Remote publish step failed.
    #[error("publish error: {0}")]
    Publish(String),

    /// An unrecovered error terminated the run in the named stage.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        source: Box<RegBriefError>,
    },

    /// The run was cancelled before entering the named stage.
    #[error("run cancelled before {stage}")]
    Cancelled { stage: Stage },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RegBriefError>;

impl RegBriefError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attribute this error to a pipeline stage.
    ///
    /// Errors that already carry a stage (or a cancellation) are returned as-is.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } | Self::Cancelled { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } | Self::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }
}
