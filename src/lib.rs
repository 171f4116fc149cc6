//! dbtrunner - Scheduled dbt Pipeline Runner
//!
//! Keeps a dbt project checkout up to date and runs `dbt deps` then
//! `dbt build` against it, on demand or daily on a cron schedule.
//!
//! # Architecture
//!
//! - [`workflow`]: Pipeline definition, schedule, run records and state
//! - [`execution`]: Run engine with retries, and the scheduler loop
//! - [`repository`]: Git checkout synchronization
//! - [`config`]: Environment-sourced settings
//! - [`monitoring`]: Per-run step timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use dbtrunner::config::PipelineEnv;
//! use dbtrunner::execution::Engine;
//! use dbtrunner::workflow::{dbt_pipeline, RunTrigger};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = dbt_pipeline(&PipelineEnv::from_env())?;
//!
//!     let mut engine = Engine::new(workflow);
//!     let report = engine.run(Utc::now(), RunTrigger::Manual);
//!
//!     assert!(report.succeeded());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod repository;
pub mod workflow;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use execution::{Engine, Scheduler};
pub use workflow::model::{Step, Workflow};
pub use workflow::pipeline::dbt_pipeline;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "dbtrunner";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "dbtrunner");
    }

    #[test]
    fn test_module_exports_step() {
        let step = Step::shell("run_dbt_deps", "dbt deps");
        assert_eq!(step.id, "run_dbt_deps");
        assert_eq!(step.describe(), "dbt deps");
    }

    #[test]
    fn test_module_exports_pipeline() {
        let workflow = dbt_pipeline(&config::PipelineEnv::default()).unwrap();
        assert_eq!(workflow.len(), 3);
    }
}
