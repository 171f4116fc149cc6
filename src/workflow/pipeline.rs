//! The dbt Pipeline
//!
//! Static definition of the daily dbt workflow:
//!
//! ```text
//! prepare_dbt_repo >> run_dbt_deps >> run_dbt_build
//! ```

use chrono::{TimeZone, Utc};
use log::info;

use super::model::{RetryPolicy, Step, Workflow};
use super::validator::validate_workflow;
use crate::config::PipelineEnv;
use crate::error::{PipelineError, Result};

pub const WORKFLOW_ID: &str = "dbt_pipeline";
pub const DESCRIPTION: &str = "dbt transformations and tests";
pub const OWNER: &str = "airflow";

/// Daily at 03:00 UTC.
pub const SCHEDULE: &str = "0 3 * * *";

pub const TAGS: &[&str] = &["dbt"];

pub const PREPARE_REPO: &str = "prepare_dbt_repo";
pub const DBT_DEPS: &str = "run_dbt_deps";
pub const DBT_BUILD: &str = "run_dbt_build";

/// Activates the virtualenv, then resolves packages.
pub const DEPS_TEMPLATE: &str =
    "source {venv_path}/bin/activate && cd {local_path} && dbt deps --profiles-dir {profiles_dir}";

/// Calls the virtualenv's dbt binary directly, without activation.
pub const BUILD_TEMPLATE: &str =
    "cd {local_path} && {venv_path}/bin/dbt build --profiles-dir {profiles_dir}";

/// Substitutes `{local_path}`, `{profiles_dir}` and `{venv_path}`.
///
/// Values are inserted verbatim; empty settings leave empty gaps.
pub fn render_command(template: &str, env: &PipelineEnv) -> String {
    template
        .replace("{local_path}", &env.local_path)
        .replace("{profiles_dir}", &env.profiles_dir)
        .replace("{venv_path}", &env.venv_path)
}

/// Builds and validates the dbt workflow for the given settings.
///
/// # Example
///
/// ```
/// use dbtrunner::config::PipelineEnv;
/// use dbtrunner::workflow::pipeline::{dbt_pipeline, DBT_BUILD};
///
/// let env = PipelineEnv {
///     repo_url: "https://example.com/analytics.git".into(),
///     local_path: "/srv/analytics".into(),
///     profiles_dir: "/srv/profiles".into(),
///     venv_path: "/srv/venv".into(),
/// };
/// let workflow = dbt_pipeline(&env).unwrap();
/// assert_eq!(workflow.steps.len(), 3);
/// assert_eq!(workflow.steps[2].id, DBT_BUILD);
/// ```
pub fn dbt_pipeline(env: &PipelineEnv) -> Result<Workflow> {
    let start_date = Utc
        .with_ymd_and_hms(2025, 1, 23, 0, 0, 0)
        .single()
        .ok_or_else(|| PipelineError::Validation("invalid start date".to_string()))?;

    let mut workflow = Workflow::new(WORKFLOW_ID, SCHEDULE, start_date);
    workflow.description = DESCRIPTION.to_string();
    workflow.owner = OWNER.to_string();
    workflow.catchup = false;
    workflow.depends_on_past = false;
    workflow.retry_policy = RetryPolicy::default();
    workflow.tags = TAGS.iter().map(|t| t.to_string()).collect();

    workflow.add_step(Step::sync_repository(
        PREPARE_REPO,
        env.repo_url.clone(),
        env.local_path.clone(),
    ))?;
    workflow.add_step(Step::shell(DBT_DEPS, render_command(DEPS_TEMPLATE, env)))?;
    workflow.add_step(Step::shell(DBT_BUILD, render_command(BUILD_TEMPLATE, env)))?;

    workflow.chain(&[PREPARE_REPO, DBT_DEPS, DBT_BUILD])?;
    validate_workflow(&mut workflow)?;

    let missing = env.missing();
    if !missing.is_empty() {
        info!("Unset settings passed through as empty strings: {}", missing.join(", "));
    }

    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::StepAction;
    use std::time::Duration;

    fn sample_env() -> PipelineEnv {
        PipelineEnv {
            repo_url: "git@example.com:data/analytics.git".into(),
            local_path: "/opt/dbt/analytics".into(),
            profiles_dir: "/opt/dbt/profiles".into(),
            venv_path: "/opt/dbt/venv".into(),
        }
    }

    #[test]
    fn test_definition_metadata() {
        let workflow = dbt_pipeline(&sample_env()).unwrap();

        assert_eq!(workflow.id, "dbt_pipeline");
        assert_eq!(workflow.description, "dbt transformations and tests");
        assert_eq!(workflow.schedule, "0 3 * * *");
        assert_eq!(workflow.start_date, Utc.with_ymd_and_hms(2025, 1, 23, 0, 0, 0).unwrap());
        assert_eq!(workflow.owner, "airflow");
        assert!(!workflow.catchup);
        assert!(!workflow.depends_on_past);
        assert_eq!(workflow.tags, vec!["dbt"]);
        assert_eq!(workflow.retry_policy.retries, 1);
        assert_eq!(workflow.retry_policy.retry_delay, Duration::from_secs(300));
        assert!(!workflow.retry_policy.email_on_failure);
        assert!(!workflow.retry_policy.email_on_retry);
    }

    #[test]
    fn test_steps_are_linear_in_order() {
        let workflow = dbt_pipeline(&sample_env()).unwrap();

        assert_eq!(workflow.step_ids(), vec![PREPARE_REPO, DBT_DEPS, DBT_BUILD]);
        assert!(workflow.steps[0].previous.is_empty());
        assert_eq!(workflow.steps[1].previous, vec![PREPARE_REPO]);
        assert_eq!(workflow.steps[2].previous, vec![DBT_DEPS]);
        assert!(workflow.steps[2].next.is_empty());
    }

    #[test]
    fn test_sync_step_uses_repo_settings() {
        let workflow = dbt_pipeline(&sample_env()).unwrap();
        assert_eq!(
            workflow.steps[0].action,
            StepAction::SyncRepository {
                remote_url: "git@example.com:data/analytics.git".into(),
                local_path: "/opt/dbt/analytics".into(),
            }
        );
    }

    #[test]
    fn test_rendered_commands() {
        let workflow = dbt_pipeline(&sample_env()).unwrap();

        assert_eq!(
            workflow.steps[1].action,
            StepAction::Shell {
                command: "source /opt/dbt/venv/bin/activate && cd /opt/dbt/analytics && dbt deps --profiles-dir /opt/dbt/profiles".into()
            }
        );
        assert_eq!(
            workflow.steps[2].action,
            StepAction::Shell {
                command: "cd /opt/dbt/analytics && /opt/dbt/venv/bin/dbt build --profiles-dir /opt/dbt/profiles".into()
            }
        );
    }

    #[test]
    fn test_empty_settings_propagate() {
        let workflow = dbt_pipeline(&PipelineEnv::default()).unwrap();
        assert_eq!(
            workflow.steps[2].action,
            StepAction::Shell { command: "cd  && /bin/dbt build --profiles-dir".into() }
        );
    }
}
