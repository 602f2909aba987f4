//! callscribe - Call recording transcription and review pipeline
//!
//! Watches recorder output directories for finished call audio, transcribes
//! each call through a pluggable engine, analyzes the transcript into a
//! structured record, and generates word-level review artifacts for human
//! quality checks.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod cli;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod review;
pub mod sys;
pub mod transcript;
pub mod watch;

// Collaborator contracts (transcribe → parse → analyze)
pub use engine::{CallAnalyzer, CallAnalysis, TranscriptionEngine, TranscriptionResult};

// Pipeline
pub use pipeline::{Pipeline, PipelineHandle};

// Error handling
pub use error::{CallscribeError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.3.1+abc1234"` when git hash is available, `"0.3.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
