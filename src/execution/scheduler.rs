//! Scheduler Loop
//!
//! Fires runs of a workflow at its cron times, one run at a time:
//! - Fire times are computed in UTC and never precede the start date
//! - With catch-up off, missed fire times are skipped
//! - With catch-up on, every fire time after the last recorded one is
//!   run in order before waiting for the next
//! - Ctrl-C stops the loop once the current run has finished
//!
//! The scheduler holds a [`RunLock`] so two processes never drive the
//! same state directory.

use std::future::Future;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use tokio::sync::watch;

use crate::error::{PipelineError, Result};
use crate::workflow::{CronSchedule, RunLock, RunReport, RunTrigger, Workflow, WorkflowState};

use super::engine::Engine;

/// First fire time strictly after `now`, not before the start date.
pub fn next_fire_time(
    workflow: &Workflow,
    schedule: &CronSchedule,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let floor = workflow.start_date - ChronoDuration::minutes(1);
    let mut candidate = schedule.next_after(now.max(floor))?;
    while candidate < workflow.start_date {
        candidate = schedule.next_after(candidate)?;
    }
    Some(candidate)
}

/// Where the search for the next fire time starts: `now`, but never
/// before the newest scheduled run, so a clock stepping backwards
/// cannot repeat a logical date.
pub fn schedule_cursor(
    now: DateTime<Utc>,
    last_scheduled: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    last_scheduled.map_or(now, |last| now.max(last))
}

/// Missed fire times that should still run, oldest first.
///
/// Empty unless the workflow has catch-up enabled. Otherwise covers
/// `(last_scheduled, now]`, or `[start_date, now]` on a first start.
pub fn due_runs(
    workflow: &Workflow,
    schedule: &CronSchedule,
    last_scheduled: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    if !workflow.catchup {
        return Vec::new();
    }

    let after = last_scheduled.unwrap_or(workflow.start_date - ChronoDuration::minutes(1));
    schedule
        .between(after, now)
        .into_iter()
        .filter(|t| *t >= workflow.start_date)
        .collect()
}

/// Drives an [`Engine`] on the workflow's schedule.
pub struct Scheduler {
    engine: Option<Engine>,
    schedule: CronSchedule,
    state_dir: PathBuf,
    state: WorkflowState,
}

impl Scheduler {
    /// Parses the workflow's schedule and loads its saved state.
    pub fn new(engine: Engine, state_dir: impl Into<PathBuf>) -> Result<Self> {
        let schedule = CronSchedule::parse(&engine.workflow().schedule)?;
        let state_dir = state_dir.into();
        let state = WorkflowState::load_or_new(&state_dir, &engine.workflow().id);

        Ok(Self {
            engine: Some(engine),
            schedule,
            state_dir,
            state,
        })
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Runs every missed fire time the workflow wants caught up.
    pub async fn catch_up(&mut self, now: DateTime<Utc>) -> Result<Vec<RunReport>> {
        let (_never, stop) = watch::channel(false);
        self.catch_up_until(now, &stop).await
    }

    /// Like [`Scheduler::catch_up`], checking `stop` before each run.
    async fn catch_up_until(
        &mut self,
        now: DateTime<Utc>,
        stop: &watch::Receiver<bool>,
    ) -> Result<Vec<RunReport>> {
        let workflow = self.workflow()?;
        let due = due_runs(workflow, &self.schedule, self.state.last_scheduled, now);
        if due.is_empty() {
            return Ok(Vec::new());
        }

        info!("Catching up {} missed run(s)", due.len());
        let mut reports = Vec::with_capacity(due.len());
        for logical_date in due {
            if *stop.borrow() {
                info!("Stopping catch-up before {}", logical_date.to_rfc3339());
                break;
            }
            reports.push(self.execute(logical_date).await?);
        }
        Ok(reports)
    }

    /// Runs until Ctrl-C, or until the schedule can never fire again.
    pub async fn run_forever(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl-C, stopping after the current run");
        })
        .await
    }

    /// Runs until `shutdown` resolves. A run in flight is finished first.
    ///
    /// `shutdown` is driven on its own task from the start, so a signal
    /// listener is in place before the first run begins.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let workflow_id = self.workflow()?.id.clone();
        let _lock = RunLock::acquire(&self.state_dir, &workflow_id)?;

        let (stop_tx, mut stop) = watch::channel(false);
        let listener = tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });
        tokio::task::yield_now().await;

        let result = self.drive(&workflow_id, &mut stop).await;
        listener.abort();
        result
    }

    async fn drive(&mut self, workflow_id: &str, stop: &mut watch::Receiver<bool>) -> Result<()> {
        self.catch_up_until(Utc::now(), stop).await?;

        loop {
            if *stop.borrow_and_update() {
                return Ok(());
            }

            let now = Utc::now();
            let cursor = schedule_cursor(now, self.state.last_scheduled);
            let Some(next) = next_fire_time(self.workflow()?, &self.schedule, cursor) else {
                warn!("Schedule '{}' never fires again", self.schedule.expression());
                return Ok(());
            };

            let wait = (next - now).to_std().unwrap_or_default();
            info!(
                "Next run of '{}' at {} (in {})",
                workflow_id,
                next.to_rfc3339(),
                humantime::format_duration(std::time::Duration::from_secs(wait.as_secs()))
            );

            tokio::select! {
                biased;
                _ = stop.changed() => return Ok(()),
                _ = tokio::time::sleep(wait) => {}
            }

            self.execute(next).await?;
        }
    }

    fn workflow(&self) -> Result<&Workflow> {
        self.engine
            .as_ref()
            .map(Engine::workflow)
            .ok_or_else(lost_engine)
    }

    /// Runs one scheduled run on a blocking thread and records it.
    async fn execute(&mut self, logical_date: DateTime<Utc>) -> Result<RunReport> {
        let mut engine = self.engine.take().ok_or_else(lost_engine)?;

        let (engine, report) = tokio::task::spawn_blocking(move || {
            let report = engine.run(logical_date, RunTrigger::Scheduled);
            (engine, report)
        })
        .await
        .map_err(|e| PipelineError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

        info!(
            "Run {} finished: {:?}\n{}",
            report.run_id,
            report.state,
            engine.timeline().chart()
        );
        self.engine = Some(engine);

        self.state.record(&report);
        self.state.save(&self.state_dir)?;
        Ok(report)
    }
}

fn lost_engine() -> PipelineError {
    PipelineError::Io(io::Error::new(
        io::ErrorKind::Other,
        "engine lost after a panicked run",
    ))
}
