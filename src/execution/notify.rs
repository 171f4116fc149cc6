//! Retry and failure notifications.
//!
//! The engine only calls a [`Notifier`] when the workflow's retry policy
//! asks for it (`email_on_retry` / `email_on_failure`).

use std::fmt;
use std::time::Duration;

use log::warn;

/// Something worth telling an operator about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A step failed and will be attempted again after `delay`.
    Retry {
        workflow_id: String,
        step_id: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// A step failed with no attempts left.
    Failure {
        workflow_id: String,
        step_id: String,
        attempts: u32,
        error: String,
    },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry { workflow_id, step_id, attempt, delay, error } => write!(
                f,
                "[{}] step '{}' attempt {} failed, retrying in {}: {}",
                workflow_id,
                step_id,
                attempt,
                humantime::format_duration(*delay),
                error
            ),
            Self::Failure { workflow_id, step_id, attempts, error } => write!(
                f,
                "[{}] step '{}' failed after {} attempt(s): {}",
                workflow_id, step_id, attempts, error
            ),
        }
    }
}

/// Delivers notifications.
pub trait Notifier: Send {
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        warn!("{}", notification);
    }
}
