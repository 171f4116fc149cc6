//! Run Records
//!
//! The outcome of one pipeline run: which steps ran, how many attempts
//! each took, and how the run ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a single step within a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its predecessor
    Pending,
    Running,
    /// Failed, waiting out the retry delay
    UpForRetry,
    Success,
    /// Failed with no attempts left
    Failed,
    /// Never started because an earlier step failed
    UpstreamFailed,
}

impl TaskState {
    /// Returns true once the state can no longer change within the run.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::UpstreamFailed)
    }
}

/// Overall state of a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Success,
    Failed,
}

/// What started a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Manual,
    Scheduled,
}

impl RunTrigger {
    /// Builds the run identifier for a logical date, e.g.
    /// `scheduled__2025-01-24T03:00:00+00:00`.
    pub fn run_id(self, logical_date: DateTime<Utc>) -> String {
        let prefix = match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        };
        format!("{}__{}", prefix, logical_date.to_rfc3339())
    }
}

/// One step's record within a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskInstance {
    pub step_id: String,
    pub state: TaskState,

    /// Attempts started so far (0 if the step never ran)
    pub try_number: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Message of the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskInstance {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            state: TaskState::Pending,
            try_number: 0,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    /// Wall-clock time from the first attempt's start to the final end.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }
}

/// The complete record of one run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub workflow_id: String,
    pub run_id: String,
    pub trigger: RunTrigger,
    pub logical_date: DateTime<Utc>,
    pub state: RunState,
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Steps in execution order
    pub tasks: Vec<TaskInstance>,
}

impl RunReport {
    pub fn task(&self, step_id: &str) -> Option<&TaskInstance> {
        self.tasks.iter().find(|t| t.step_id == step_id)
    }

    /// The step that ended the run, if it failed.
    pub fn failed_task(&self) -> Option<&TaskInstance> {
        self.tasks.iter().find(|t| t.state == TaskState::Failed)
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Success
    }
}
