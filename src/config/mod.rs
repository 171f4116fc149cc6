//! Configuration Module
//!
//! Environment-sourced settings for the dbt pipeline.
//!
//! - [`env`]: the four pipeline variables and optional dotenv loading

pub mod env;

pub use env::{load_env_file, PipelineEnv, LOCAL_PATH_VAR, PROFILES_DIR_VAR, REPO_URL_VAR, VENV_PATH_VAR};
