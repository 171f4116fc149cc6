//! Error Types
//!
//! A single error enum covers every failure the pipeline can report.
//! Tool failures keep the tool's own diagnostics so they reach the
//! log unmodified.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while building, scheduling, or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Target directory exists, is not empty, and has no `.git` directory.
    #[error(
        "directory '{}' already exists but is not a valid Git repository; remove it manually",
        path.display()
    )]
    InvalidCheckout { path: PathBuf },

    /// Git could not be spawned or exited non-zero.
    #[error("`{command}` failed: {details}")]
    Git { command: String, details: String },

    /// A shell step exited non-zero (or was killed by a signal).
    #[error("step '{step}' failed with exit code {}", code.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string()))]
    StepFailed { step: String, code: Option<i32> },

    /// The cron expression could not be parsed.
    #[error("invalid schedule '{expression}': {reason}")]
    Schedule { expression: String, reason: String },

    /// The env file or a CLI override could not be read.
    #[error("configuration error: {0}")]
    Config(String),

    /// The workflow definition is not a runnable linear pipeline.
    #[error("invalid workflow: {0}")]
    Validation(String),

    /// The state file could not be encoded or decoded.
    #[error("state file error: {0}")]
    State(#[from] serde_json::Error),

    /// A live process already holds the run lock for this workflow.
    #[error("workflow '{workflow}' is locked by {}; another run or scheduler is active", lock.display())]
    Locked { workflow: String, lock: PathBuf },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
