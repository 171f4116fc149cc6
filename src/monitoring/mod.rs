//! Monitoring Module
//!
//! Per-run step timing for the run summary.

pub mod timeline;

pub use timeline::{EventKind, RunTimeline, TimelineEvent};
