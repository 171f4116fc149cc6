//! Workflow Data Model
//!
//! Core data structures describing a scheduled pipeline: its schedule,
//! its retry policy, and the steps it runs.
//!
//! # Example YAML Format
//!
//! ```yaml
//! id: dbt_pipeline
//! description: dbt transformations and tests
//! schedule: 0 3 * * *
//! start_date: 2025-01-23T00:00:00Z
//! catchup: false
//! retry_policy:
//!   retries: 1
//!   retry_delay: 5m
//!   email_on_failure: false
//!   email_on_retry: false
//! tags: [dbt]
//! steps:
//!   - id: prepare_dbt_repo
//!     action:
//!       kind: sync_repository
//!       remote_url: https://example.com/analytics.git
//!       local_path: /opt/dbt/analytics
//!     next: [run_dbt_deps]
//!   - id: run_dbt_deps
//!     action:
//!       kind: shell
//!       command: source /opt/venv/bin/activate && cd /opt/dbt/analytics && dbt deps --profiles-dir /opt/dbt/profiles
//!     previous: [prepare_dbt_repo]
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// What a step does when it runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Clone or pull `remote_url` into `local_path`.
    SyncRepository { remote_url: String, local_path: String },
    /// Run a bash command.
    Shell { command: String },
}

/// A single step in a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Unique identifier within the workflow
    pub id: String,

    pub action: StepAction,

    /// IDs of steps that must succeed before this one starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous: Vec<String>,

    /// IDs of steps that wait on this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<String>,
}

impl Step {
    /// Creates a step that runs a shell command.
    ///
    /// # Example
    ///
    /// ```
    /// use dbtrunner::workflow::Step;
    ///
    /// let step = Step::shell("run_dbt_build", "cd /srv/dbt && dbt build")
    ///     .depends_on("run_dbt_deps");
    /// assert_eq!(step.previous, vec!["run_dbt_deps"]);
    /// ```
    pub fn shell(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            action: StepAction::Shell {
                command: command.into().trim().to_string(),
            },
            previous: Vec::new(),
            next: Vec::new(),
        }
    }

    /// Creates a step that keeps `local_path` in sync with `remote_url`.
    pub fn sync_repository(
        id: impl Into<String>,
        remote_url: impl Into<String>,
        local_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into().trim().to_string(),
            action: StepAction::SyncRepository {
                remote_url: remote_url.into(),
                local_path: local_path.into(),
            },
            previous: Vec::new(),
            next: Vec::new(),
        }
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.previous.push(step_id.into());
        self
    }

    /// One-line rendering of the action, used by dry runs and `show`.
    pub fn describe(&self) -> String {
        match &self.action {
            StepAction::SyncRepository { remote_url, local_path } => {
                format!("sync {} -> {}", remote_url, local_path)
            }
            StepAction::Shell { command } => command.clone(),
        }
    }
}

/// How a failing step is retried and who hears about it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub retries: u32,

    /// Pause before each retry
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,

    #[serde(default)]
    pub email_on_failure: bool,

    #[serde(default)]
    pub email_on_retry: bool,
}

impl RetryPolicy {
    /// Total attempts a step gets, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay: Duration::from_secs(5 * 60),
            email_on_failure: false,
            email_on_retry: false,
        }
    }
}

/// Serializes durations as human-readable strings ("5m", "30s").
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// A complete scheduled workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub id: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub owner: String,

    /// Five-field cron expression, evaluated in UTC
    pub schedule: String,

    /// No run is scheduled before this instant
    pub start_date: DateTime<Utc>,

    /// Whether fire times missed while the scheduler was down are run
    #[serde(default)]
    pub catchup: bool,

    /// Runs never wait on the outcome of earlier runs; must stay false
    #[serde(default)]
    pub depends_on_past: bool,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Steps in execution order
    pub steps: Vec<Step>,
}

impl Workflow {
    /// Creates an empty workflow with default policy.
    pub fn new(
        id: impl Into<String>,
        schedule: impl Into<String>,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            owner: String::new(),
            schedule: schedule.into(),
            start_date,
            catchup: false,
            depends_on_past: false,
            retry_policy: RetryPolicy::default(),
            tags: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Adds a step to the workflow.
    pub fn add_step(&mut self, step: Step) -> Result<()> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(PipelineError::Validation(format!(
                "step '{}' already exists",
                step.id
            )));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Makes `downstream` wait for `upstream`, filling both link lists.
    pub fn set_downstream(&mut self, upstream: &str, downstream: &str) -> Result<()> {
        for id in [upstream, downstream] {
            if self.get_step(id).is_none() {
                return Err(PipelineError::Validation(format!("step '{}' not found", id)));
            }
        }

        if let Some(step) = self.get_step_mut(upstream) {
            if !step.next.iter().any(|n| n == downstream) {
                step.next.push(downstream.to_string());
            }
        }
        if let Some(step) = self.get_step_mut(downstream) {
            if !step.previous.iter().any(|p| p == upstream) {
                step.previous.push(upstream.to_string());
            }
        }
        Ok(())
    }

    /// Links the given steps into a chain, in order.
    pub fn chain(&mut self, ids: &[&str]) -> Result<()> {
        for pair in ids.windows(2) {
            self.set_downstream(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Gets a step by ID.
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Gets a mutable reference to a step by ID.
    pub fn get_step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Returns steps with no dependencies.
    pub fn root_steps(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.previous.is_empty()).collect()
    }

    /// Step IDs in execution order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
