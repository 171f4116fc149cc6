//! Git Client
//!
//! Thin wrapper around the `git` executable. Every call captures stderr
//! so failures carry git's own diagnostics.
//!
//! # Binary Resolution
//!
//! 1. `DBTRUNNER_GIT` environment variable
//! 2. `git` from the system PATH

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use once_cell::sync::Lazy;

use crate::error::{PipelineError, Result};

/// Environment variable overriding the git executable.
pub const GIT_OVERRIDE_VAR: &str = "DBTRUNNER_GIT";

/// Lazily-resolved git executable.
pub static GIT_PATH: Lazy<PathBuf> = Lazy::new(|| match std::env::var_os(GIT_OVERRIDE_VAR) {
    Some(path) if !path.is_empty() => {
        let path = PathBuf::from(path);
        info!("Using git from {}: {}", GIT_OVERRIDE_VAR, path.display());
        path
    }
    _ => PathBuf::from("git"),
});

/// Runs git subcommands.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    /// Uses a specific git executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `git <args>` in `cwd` and returns trimmed stdout.
    pub fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let rendered = format!("git {}", args.join(" "));
        debug!("Running `{}`", rendered);

        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command.output().map_err(|e| PipelineError::Git {
            command: rendered.clone(),
            details: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PipelineError::Git {
                command: rendered,
                details: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        if !stdout.is_empty() {
            debug!("{}", stdout);
        }
        Ok(stdout)
    }

    /// `git clone <remote_url> <dest>`
    pub fn clone_repo(&self, remote_url: &str, dest: &Path) -> Result<()> {
        let dest = dest.to_string_lossy();
        self.run(&["clone", remote_url, &dest], None)?;
        Ok(())
    }

    /// `git pull` inside an existing checkout.
    pub fn pull(&self, checkout: &Path) -> Result<String> {
        self.run(&["pull"], Some(checkout))
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(GIT_PATH.as_path())
    }
}
