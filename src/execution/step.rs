//! Individual Step Execution
//!
//! Runs one attempt of a single workflow step:
//! - Repository steps go through [`sync_checkout`]
//! - Shell steps are written to a temporary bash script and run with
//!   `bash`, so `source` and `&&` chains behave as in a login shell

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};

use log::{debug, error};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};
use crate::repository::{sync_checkout, GitCli, SyncOutcome};
use crate::workflow::{Step, StepAction};

/// Executes a single attempt of a workflow step.
///
/// # Arguments
///
/// * `step` - The step to run
/// * `git` - Git client used by repository steps
/// * `working_dir` - Directory shell steps start in (defaults to the
///   process working directory)
///
/// # Returns
///
/// * `Ok(())` - The step completed successfully
/// * `Err` - The tool's failure, unmodified
pub fn execute_step(step: &Step, git: &GitCli, working_dir: Option<&Path>) -> Result<()> {
    match &step.action {
        StepAction::SyncRepository { remote_url, local_path } => {
            match sync_checkout(git, remote_url, local_path)? {
                SyncOutcome::Cloned => debug!("Step '{}' cloned {}", step.id, remote_url),
                SyncOutcome::Updated => debug!("Step '{}' updated {}", step.id, local_path),
            }
            Ok(())
        }
        StepAction::Shell { command } => run_shell(&step.id, command, working_dir),
    }
}

fn run_shell(step_id: &str, command_text: &str, working_dir: Option<&Path>) -> Result<()> {
    // Removed when dropped at the end of this function
    let script = create_execution_script(step_id, command_text)?;
    let output = execute_with_bash(script.path(), working_dir)?;

    if output.status.success() {
        debug!("Step '{}' completed successfully", step_id);

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("Step '{}' output:\n{}", step_id, stdout);
        }

        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);

        error!(
            "Step '{}' failed with exit code: {:?}",
            step_id,
            output.status.code()
        );

        if !stderr.trim().is_empty() {
            error!("stderr:\n{}", stderr);
        }
        // dbt reports model failures on stdout
        if !stdout.trim().is_empty() {
            error!("stdout:\n{}", stdout);
        }

        Err(PipelineError::StepFailed {
            step: step_id.to_string(),
            code: output.status.code(),
        })
    }
}

/// Creates a temporary bash script for a shell step.
///
/// The file gets a random name, is created exclusively and readable only
/// by the owner.
fn create_execution_script(step_id: &str, command_text: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("dbtrunner_{}_", step_id))
        .suffix(".sh")
        .tempfile()?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command_text)?;
    file.flush()?;

    Ok(file)
}

fn execute_with_bash(script_path: &Path, working_dir: Option<&Path>) -> Result<Output> {
    let mut cmd = Command::new("bash");
    cmd.arg(script_path);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
        debug!("Executing in directory: {}", dir.display());
    }

    Ok(cmd.output()?)
}
