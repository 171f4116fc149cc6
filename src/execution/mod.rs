//! Workflow Execution Module
//!
//! Runs the pipeline, once on demand or repeatedly on its schedule.
//!
//! # Architecture
//!
//! - [`engine`]: Runs one pipeline run with per-step retries
//! - [`step`]: Executes a single step attempt
//! - [`notify`]: Retry and failure notifications
//! - [`scheduler`]: Cron-driven loop around the engine

pub mod engine;
pub mod notify;
pub mod scheduler;
pub mod step;

pub use engine::Engine;
pub use notify::{LogNotifier, Notification, Notifier};
pub use scheduler::{due_runs, next_fire_time, schedule_cursor, Scheduler};
