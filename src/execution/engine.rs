//! Pipeline Execution Engine
//!
//! Drives one run of a workflow:
//! - Steps run one at a time in chain order
//! - A failing step is retried per the workflow's [`RetryPolicy`]
//! - Once a step fails for good, every later step is marked
//!   upstream-failed and never started
//! - Notifications go out only when the policy enables them
//!
//! [`RetryPolicy`]: crate::workflow::RetryPolicy

use std::path::PathBuf;
use std::thread;

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::monitoring::{EventKind, RunTimeline};
use crate::repository::GitCli;
use crate::workflow::{RunReport, RunState, RunTrigger, TaskInstance, TaskState, Workflow};

use super::notify::{LogNotifier, Notification, Notifier};
use super::step::execute_step;

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use chrono::Utc;
/// use dbtrunner::config::PipelineEnv;
/// use dbtrunner::execution::Engine;
/// use dbtrunner::workflow::{dbt_pipeline, RunTrigger};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = dbt_pipeline(&PipelineEnv::from_env())?;
///     let mut engine = Engine::new(workflow);
///
///     let report = engine.run(Utc::now(), RunTrigger::Manual);
///     println!("{:?}", report.state);
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    git: GitCli,
    dry_run: bool,
    working_dir: Option<PathBuf>,
    notifier: Box<dyn Notifier>,
    timeline: RunTimeline,
}

impl Engine {
    /// Creates an engine that logs notifications and uses the default git.
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            git: GitCli::default(),
            dry_run: false,
            working_dir: None,
            notifier: Box::new(LogNotifier),
            timeline: RunTimeline::new(),
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Sets the working directory for shell steps.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    pub fn set_git(&mut self, git: GitCli) {
        self.git = git;
    }

    pub fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.notifier = notifier;
    }

    /// Timeline of the most recent run.
    pub fn timeline(&self) -> &RunTimeline {
        &self.timeline
    }

    /// Executes one run of the workflow for `logical_date`.
    ///
    /// Step failures never escape as errors; they are recorded in the
    /// returned report and reflected in its state.
    pub fn run(&mut self, logical_date: DateTime<Utc>, trigger: RunTrigger) -> RunReport {
        let run_id = trigger.run_id(logical_date);
        let mut report = RunReport {
            workflow_id: self.workflow.id.clone(),
            run_id: run_id.clone(),
            trigger,
            logical_date,
            state: RunState::Running,
            started_at: Utc::now(),
            ended_at: None,
            tasks: self
                .workflow
                .steps
                .iter()
                .map(|step| TaskInstance::new(step.id.clone()))
                .collect(),
        };
        self.timeline = RunTimeline::new();

        info!(
            "Starting run {} ({} steps, dry run: {})",
            run_id,
            self.workflow.len(),
            self.dry_run
        );

        let mut halted = false;
        for index in 0..self.workflow.steps.len() {
            if halted {
                let task = &mut report.tasks[index];
                task.state = TaskState::UpstreamFailed;
                self.timeline.record(&task.step_id, EventKind::Skipped);
                warn!("Skipping step '{}': upstream failed", task.step_id);
                continue;
            }

            if self.dry_run {
                self.dry_run_step(index, &mut report.tasks[index]);
                continue;
            }

            if !self.run_step(index, &mut report.tasks[index]) {
                halted = true;
            }
        }

        report.state = if halted { RunState::Failed } else { RunState::Success };
        report.ended_at = Some(Utc::now());

        match report.failed_task() {
            Some(task) => error!("Run {} failed at step '{}'", run_id, task.step_id),
            None => info!("Run {} completed successfully", run_id),
        }

        report
    }

    fn dry_run_step(&mut self, index: usize, task: &mut TaskInstance) {
        let step = &self.workflow.steps[index];

        println!();
        println!("[DRY RUN] Step: {}", step.id);
        println!("  Action: {}", step.describe());
        if !step.previous.is_empty() {
            println!("  After: {}", step.previous.join(", "));
        }

        self.timeline.record(&step.id, EventKind::Started);
        self.timeline.record(&step.id, EventKind::Succeeded);
        task.state = TaskState::Success;
    }

    /// Runs one step through all its attempts. Returns false when the
    /// step failed for good.
    fn run_step(&mut self, index: usize, task: &mut TaskInstance) -> bool {
        let step = &self.workflow.steps[index];
        let policy = &self.workflow.retry_policy;
        let max_attempts = policy.max_attempts();

        task.started_at = Some(Utc::now());

        loop {
            task.try_number += 1;
            task.state = TaskState::Running;
            self.timeline.record(&step.id, EventKind::Started);
            info!(
                "Starting step: {} (attempt {}/{})",
                step.id, task.try_number, max_attempts
            );

            match execute_step(step, &self.git, self.working_dir.as_deref()) {
                Ok(()) => {
                    task.state = TaskState::Success;
                    task.error = None;
                    task.ended_at = Some(Utc::now());
                    self.timeline.record(&step.id, EventKind::Succeeded);
                    info!("Step '{}' completed successfully", step.id);
                    return true;
                }
                Err(e) if task.try_number < max_attempts => {
                    task.state = TaskState::UpForRetry;
                    task.error = Some(e.to_string());
                    self.timeline.record(&step.id, EventKind::Retrying);
                    warn!(
                        "Step '{}' failed: {}; retrying in {}",
                        step.id,
                        e,
                        humantime::format_duration(policy.retry_delay)
                    );

                    if policy.email_on_retry {
                        self.notifier.notify(&Notification::Retry {
                            workflow_id: self.workflow.id.clone(),
                            step_id: step.id.clone(),
                            attempt: task.try_number,
                            delay: policy.retry_delay,
                            error: e.to_string(),
                        });
                    }

                    thread::sleep(policy.retry_delay);
                }
                Err(e) => {
                    task.state = TaskState::Failed;
                    task.error = Some(e.to_string());
                    task.ended_at = Some(Utc::now());
                    self.timeline.record(&step.id, EventKind::Failed);
                    error!("Step '{}' failed: {}", step.id, e);

                    if policy.email_on_failure {
                        self.notifier.notify(&Notification::Failure {
                            workflow_id: self.workflow.id.clone(),
                            step_id: step.id.clone(),
                            attempts: task.try_number,
                            error: e.to_string(),
                        });
                    }
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Step;
    use chrono::TimeZone;
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        seen: Arc<Mutex<Vec<Notification>>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) {
            self.seen.lock().unwrap().push(notification.clone());
        }
    }

    fn logical_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 24, 3, 0, 0).unwrap()
    }

    /// Three chained steps that append their names to `trace.log`.
    fn traced_workflow(build_command: &str) -> Workflow {
        let mut workflow =
            Workflow::new("traced", "0 3 * * *", Utc.with_ymd_and_hms(2025, 1, 23, 0, 0, 0).unwrap());
        workflow.add_step(Step::shell("sync", "echo sync >> trace.log")).unwrap();
        workflow.add_step(Step::shell("deps", "echo deps >> trace.log")).unwrap();
        workflow.add_step(Step::shell("build", build_command)).unwrap();
        workflow.chain(&["sync", "deps", "build"]).unwrap();
        workflow.retry_policy.retry_delay = Duration::from_millis(50);
        workflow
    }

    fn trace(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("trace.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn engine_in(workflow: Workflow, dir: &Path) -> (Engine, RecordingNotifier) {
        let notifier = RecordingNotifier::default();
        let mut engine = Engine::new(workflow);
        engine.set_working_dir(dir);
        engine.set_notifier(Box::new(notifier.clone()));
        (engine, notifier)
    }

    #[test]
    fn test_steps_run_in_chain_order() {
        let temp_dir = tempdir().unwrap();
        let (mut engine, _) =
            engine_in(traced_workflow("echo build >> trace.log"), temp_dir.path());

        let report = engine.run(logical_date(), RunTrigger::Manual);

        assert_eq!(report.state, RunState::Success);
        assert_eq!(trace(temp_dir.path()), vec!["sync", "deps", "build"]);
        assert!(report.tasks.iter().all(|t| t.state == TaskState::Success));
        assert!(report.tasks.iter().all(|t| t.try_number == 1));
        assert_eq!(report.run_id, "manual__2025-01-24T03:00:00+00:00");
        assert!(report.ended_at.is_some());
    }

    #[test]
    fn test_failure_halts_later_steps() {
        let temp_dir = tempdir().unwrap();
        let mut workflow = traced_workflow("echo build >> trace.log");
        if let Some(step) = workflow.get_step_mut("deps") {
            step.action = crate::workflow::StepAction::Shell {
                command: "echo deps >> trace.log && exit 1".into(),
            };
        }
        workflow.retry_policy.retries = 0;
        let (mut engine, _) = engine_in(workflow, temp_dir.path());

        let report = engine.run(logical_date(), RunTrigger::Manual);

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(trace(temp_dir.path()), vec!["sync", "deps"]);
        assert_eq!(report.task("deps").unwrap().state, TaskState::Failed);
        assert_eq!(report.task("build").unwrap().state, TaskState::UpstreamFailed);
        assert_eq!(report.task("build").unwrap().try_number, 0);
        assert_eq!(report.failed_task().unwrap().step_id, "deps");
    }

    #[test]
    fn test_failing_step_retried_once_then_run_fails_silently() {
        let temp_dir = tempdir().unwrap();
        let (mut engine, notifier) = engine_in(
            traced_workflow("echo build >> trace.log && exit 1"),
            temp_dir.path(),
        );

        let started = Instant::now();
        let report = engine.run(logical_date(), RunTrigger::Scheduled);

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(trace(temp_dir.path()), vec!["sync", "deps", "build", "build"]);

        let build = report.task("build").unwrap();
        assert_eq!(build.state, TaskState::Failed);
        assert_eq!(build.try_number, 2);
        assert!(build.error.as_deref().unwrap().contains("exit code 1"));
        assert_eq!(engine.timeline().retries("build"), 1);

        assert!(notifier.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_retry_recovers_transient_failure() {
        let temp_dir = tempdir().unwrap();
        // Fails the first time only
        let flaky = "if [ ! -f attempted ]; then touch attempted; exit 1; fi; echo build >> trace.log";
        let (mut engine, _) = engine_in(traced_workflow(flaky), temp_dir.path());

        let report = engine.run(logical_date(), RunTrigger::Manual);

        assert_eq!(report.state, RunState::Success);
        assert_eq!(report.task("build").unwrap().try_number, 2);
        assert!(report.task("build").unwrap().error.is_none());
    }

    #[test]
    fn test_notifications_follow_policy_flags() {
        let temp_dir = tempdir().unwrap();
        let mut workflow = traced_workflow("exit 1");
        workflow.retry_policy.email_on_retry = true;
        workflow.retry_policy.email_on_failure = true;
        let (mut engine, notifier) = engine_in(workflow, temp_dir.path());

        engine.run(logical_date(), RunTrigger::Manual);

        let seen = notifier.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], Notification::Retry { step_id, attempt: 1, .. } if step_id == "build"));
        assert!(matches!(&seen[1], Notification::Failure { attempts: 2, .. }));
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let temp_dir = tempdir().unwrap();
        let (mut engine, _) = engine_in(traced_workflow("exit 1"), temp_dir.path());
        engine.set_dry_run(true);

        let report = engine.run(logical_date(), RunTrigger::Manual);

        assert_eq!(report.state, RunState::Success);
        assert!(trace(temp_dir.path()).is_empty());
        assert!(report.tasks.iter().all(|t| t.state == TaskState::Success));
        assert!(report.tasks.iter().all(|t| t.try_number == 0));
    }

    #[test]
    fn test_each_run_gets_a_fresh_timeline() {
        let temp_dir = tempdir().unwrap();
        let (mut engine, _) =
            engine_in(traced_workflow("echo build >> trace.log"), temp_dir.path());

        engine.run(logical_date(), RunTrigger::Manual);
        engine.run(logical_date(), RunTrigger::Manual);

        // Started + Succeeded per step
        assert_eq!(engine.timeline().events().len(), 6);
    }
}
