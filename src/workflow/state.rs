//! Workflow State Persistence
//!
//! The last run of each workflow is saved to
//! `{state_dir}/{workflow_id}.state` as JSON. The scheduler reads it
//! back to decide which fire times were missed, and `status` prints it.
//!
//! [`RunLock`] keeps two schedulers from driving the same workflow.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use super::run::{RunReport, RunTrigger};
use crate::error::{PipelineError, Result};

/// Default directory for state and lock files.
pub const DEFAULT_STATE_DIR: &str = ".dbtrunner";

/// Persistent state for one workflow.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WorkflowState {
    pub workflow_id: String,

    /// Logical date of the newest scheduled run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scheduled: Option<DateTime<Utc>>,

    /// The most recent run, manual or scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunReport>,

    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Creates an empty state.
    pub fn new(workflow_id: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            last_scheduled: None,
            last_run: None,
            updated_at: Utc::now(),
        }
    }

    /// Path of the state file for a workflow.
    pub fn path_for(state_dir: &Path, workflow_id: &str) -> PathBuf {
        state_dir.join(format!("{}.state", workflow_id))
    }

    /// Loads a saved state.
    pub fn load(state_dir: &Path, workflow_id: &str) -> Result<Self> {
        let path = Self::path_for(state_dir, workflow_id);
        let content = fs::read_to_string(&path)?;
        let state: WorkflowState = serde_json::from_str(&content)?;
        debug!("Loaded workflow state from {}", path.display());
        Ok(state)
    }

    /// Loads a saved state, or starts a fresh one when none exists.
    ///
    /// A corrupt file is reported and replaced on the next save.
    pub fn load_or_new(state_dir: &Path, workflow_id: &str) -> Self {
        match Self::load(state_dir, workflow_id) {
            Ok(state) => state,
            Err(PipelineError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                info!("No previous state for '{}'", workflow_id);
                Self::new(workflow_id)
            }
            Err(e) => {
                warn!("Ignoring unreadable state for '{}': {}", workflow_id, e);
                Self::new(workflow_id)
            }
        }
    }

    /// Saves the state, creating the directory if needed.
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        fs::create_dir_all(state_dir)?;

        let path = Self::path_for(state_dir, &self.workflow_id);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;

        debug!("Saved workflow state to {}", path.display());
        Ok(())
    }

    /// Records a finished run.
    pub fn record(&mut self, report: &RunReport) {
        if report.trigger == RunTrigger::Scheduled {
            self.last_scheduled = Some(
                self.last_scheduled
                    .map_or(report.logical_date, |prev| prev.max(report.logical_date)),
            );
        }
        self.last_run = Some(report.clone());
        self.updated_at = Utc::now();
    }
}

/// Exclusive claim on a workflow's state directory.
///
/// The lock file holds the owner's PID and is removed when the guard
/// drops. A file left behind by a process that is no longer running is
/// treated as stale and reclaimed.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(state_dir: &Path, workflow_id: &str) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(format!("{}.lock", workflow_id));

        match Self::create(&path) {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match Self::owner(&path) {
                    Some(pid) if !process_alive(pid) => {
                        warn!("Reclaiming stale lock {} left by PID {}", path.display(), pid);
                        fs::remove_file(&path)?;
                    }
                    _ => {
                        return Err(PipelineError::Locked {
                            workflow: workflow_id.to_string(),
                            lock: path,
                        });
                    }
                }
            }
            Err(e) => return Err(e.into()),
            Ok(()) => {
                debug!("Acquired lock {}", path.display());
                return Ok(Self { path });
            }
        }

        // Another process may have reclaimed it first
        match Self::create(&path) {
            Ok(()) => {
                debug!("Acquired lock {}", path.display());
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(PipelineError::Locked {
                workflow: workflow_id.to_string(),
                lock: path,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn create(path: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())
    }

    /// PID recorded in a lock file. `None` while unreadable or still
    /// being written.
    fn owner(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid))
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}
