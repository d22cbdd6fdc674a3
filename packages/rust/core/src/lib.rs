//! Core pipeline for regbrief.
//!
//! Holds the stages that interpret documents (relevance filtering, control
//! mapping, summary synthesis) and the [`Orchestrator`] that runs every stage
//! of a run in order.

pub mod mapping;
pub mod pipeline;
pub mod relevance;
pub mod summary;

#[cfg(test)]
mod testing;

pub use mapping::{ControlRules, map_controls};
pub use pipeline::{
    Orchestrator, PipelineSettings, ProgressReporter, RunRequest, SilentProgress,
};
pub use relevance::{filter_relevant, heuristic_hit};
pub use summary::{Summary, build_summary, grounding_payload};
