//! Pipeline Environment
//!
//! The pipeline reads four settings from the process environment once,
//! at load time. Nothing is validated and nothing has a default: a
//! missing variable becomes an empty string and flows into the step
//! commands as-is.

use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Remote repository holding the dbt project.
pub const REPO_URL_VAR: &str = "DBT_REPO_URL";

/// Local directory the project is checked out into.
pub const LOCAL_PATH_VAR: &str = "DBT_LOCAL_PATH";

/// Directory containing `profiles.yml`.
pub const PROFILES_DIR_VAR: &str = "DBT_PROFILES_DIR";

/// Root of the virtualenv that provides the `dbt` binary.
pub const VENV_PATH_VAR: &str = "DBT_VENV_PATH";

/// Settings shared by all three pipeline steps.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineEnv {
    pub repo_url: String,
    pub local_path: String,
    pub profiles_dir: String,
    pub venv_path: String,
}

impl PipelineEnv {
    /// Reads the settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the settings through an arbitrary lookup function.
    ///
    /// Absent keys map to empty strings.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            let value = lookup(key).unwrap_or_default();
            if value.is_empty() {
                debug!("{} is not set", key);
            }
            value
        };

        Self {
            repo_url: read(REPO_URL_VAR),
            local_path: read(LOCAL_PATH_VAR),
            profiles_dir: read(PROFILES_DIR_VAR),
            venv_path: read(VENV_PATH_VAR),
        }
    }

    /// Names of the variables that resolved to an empty string.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (REPO_URL_VAR, &self.repo_url),
            (LOCAL_PATH_VAR, &self.local_path),
            (PROFILES_DIR_VAR, &self.profiles_dir),
            (VENV_PATH_VAR, &self.venv_path),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Loads variables from a dotenv file into the process environment.
///
/// With an explicit path the file must exist. Without one, `.env` in the
/// current directory is loaded if present. Variables that are already set
/// in the environment are never overwritten.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).map_err(|e| {
                PipelineError::Config(format!("failed to load env file '{}': {}", path.display(), e))
            })?;
            info!("Loaded environment from {}", path.display());
            Ok(Some(path.to_path_buf()))
        }
        None => match dotenvy::dotenv() {
            Ok(found) => {
                info!("Loaded environment from {}", found.display());
                Ok(Some(found))
            }
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(PipelineError::Config(format!("failed to load .env: {}", e))),
        },
    }
}
