//! Repository Module
//!
//! Keeps the local dbt project checkout in sync with its remote.

pub mod checkout;
pub mod git;

pub use checkout::{inspect_checkout, resolve_local_path, sync_checkout, CheckoutState, SyncOutcome};
pub use git::{GitCli, GIT_OVERRIDE_VAR, GIT_PATH};
