//! Shared types, error model, and configuration for regbrief.
//!
//! This crate is the foundation depended on by all other regbrief crates.
//! It provides:
//! - [`RegBriefError`]: the unified error type
//! - Pipeline value types ([`Source`], [`ExtractedDocument`], [`RelevantDocument`],
//!   [`MappedDocument`], [`RunRecord`], [`RunReport`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, LlmConfig, PublishBackend, PublishConfig, RulesConfig, RunConfig,
    SearchConfig, ServerConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{RegBriefError, Result};
pub use types::{
    CancelToken, ControlMapping, ExtractedDocument, Framework, MappedDocument, MappedSection,
    RelevantDocument, ReportMeta, RunId, RunOutcome, RunRecord, RunReport, Section, Source,
    SourceNote, SourceOrigin, Stage, StoredArtifact, truncate_chars,
};
