//! Workflow Definition Module
//!
//! Data structures and rules for the scheduled pipeline.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, Workflow, RetryPolicy)
//! - [`pipeline`]: The dbt workflow definition
//! - [`validator`]: Linear-chain and reference checks
//! - [`schedule`]: Cron expression parsing and fire times
//! - [`run`]: Per-run records
//! - [`state`]: Run state persistence and the scheduler lock

pub mod model;
pub mod pipeline;
pub mod run;
pub mod schedule;
pub mod state;
pub mod validator;

pub use model::{RetryPolicy, Step, StepAction, Workflow};
pub use pipeline::dbt_pipeline;
pub use run::{RunReport, RunState, RunTrigger, TaskInstance, TaskState};
pub use schedule::CronSchedule;
pub use state::{RunLock, WorkflowState, DEFAULT_STATE_DIR};
pub use validator::validate_workflow;
