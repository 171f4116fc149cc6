//! Run Timeline
//!
//! Records step start, retry, and finish times for one run and renders
//! them as an ASCII chart for the run summary.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Kind of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// An attempt started
    Started,
    /// An attempt failed and the step will be retried
    Retrying,
    Succeeded,
    /// The final attempt failed
    Failed,
    /// Not run because an earlier step failed
    Skipped,
}

impl EventKind {
    fn ends_step(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A single event in the run timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub step_id: String,
    pub kind: EventKind,
    pub timestamp: Instant,
}

/// Tracks the timeline of one run.
#[derive(Debug, Clone)]
pub struct RunTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl RunTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a step.
    pub fn record(&mut self, step_id: &str, kind: EventKind) {
        self.events.push(TimelineEvent {
            step_id: step_id.to_string(),
            kind,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Number of retries recorded for a step.
    pub fn retries(&self, step_id: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.step_id == step_id && e.kind == EventKind::Retrying)
            .count()
    }

    /// Time from each step's first start to its final event, retry
    /// delays included. Steps that never finished are absent.
    pub fn durations(&self) -> HashMap<String, Duration> {
        let mut starts: HashMap<&str, Instant> = HashMap::new();
        let mut durations = HashMap::new();

        for event in &self.events {
            match event.kind {
                EventKind::Started => {
                    starts.entry(event.step_id.as_str()).or_insert(event.timestamp);
                }
                kind if kind.ends_step() => {
                    if let Some(start) = starts.get(event.step_id.as_str()) {
                        durations.insert(
                            event.step_id.clone(),
                            event.timestamp.duration_since(*start),
                        );
                    }
                }
                _ => {}
            }
        }

        durations
    }

    /// Renders an ASCII chart, one bar per finished step, scaled to 50
    /// columns. Failed steps are drawn with `x`.
    pub fn chart(&self) -> String {
        let mut output = String::from("\nRun Timeline:\n\n");

        let total_ms = self.elapsed().as_millis();
        if total_ms == 0 {
            return output;
        }
        let scale = 50.0 / total_ms as f64;

        // step -> (first start, end, failed)
        let mut spans: Vec<(String, u128, u128, bool)> = Vec::new();
        for event in &self.events {
            let at = event.timestamp.duration_since(self.start_time).as_millis();
            match event.kind {
                EventKind::Started => {
                    if !spans.iter().any(|(id, ..)| *id == event.step_id) {
                        spans.push((event.step_id.clone(), at, at, false));
                    }
                }
                kind if kind.ends_step() => {
                    if let Some(span) = spans.iter_mut().find(|(id, ..)| *id == event.step_id) {
                        span.2 = at;
                        span.3 = kind == EventKind::Failed;
                    }
                }
                _ => {}
            }
        }

        for (step_id, start, end, failed) in spans {
            let offset = (start as f64 * scale) as usize;
            let width = (((end - start) as f64 * scale) as usize).max(1);
            let fill = if failed { "x" } else { "#" };

            output.push_str(&format!(
                "{} |{}{}| ({} ms)\n",
                pad(&step_id, 16),
                " ".repeat(offset),
                fill.repeat(width),
                end - start
            ));
        }

        for event in self.events.iter().filter(|e| e.kind == EventKind::Skipped) {
            output.push_str(&format!("{} | skipped\n", pad(&event.step_id, 16)));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_ms));
        output
    }
}

impl Default for RunTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates to exactly `width` characters.
fn pad(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        format!("{:width$}", s, width = width)
    } else {
        let head: String = s.chars().take(width - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = RunTimeline::new();
        assert!(timeline.events().is_empty());
        assert!(timeline.durations().is_empty());
    }

    #[test]
    fn test_duration_spans_retries() {
        let mut timeline = RunTimeline::new();
        timeline.record("run_dbt_build", EventKind::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.record("run_dbt_build", EventKind::Retrying);
        timeline.record("run_dbt_build", EventKind::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.record("run_dbt_build", EventKind::Failed);

        let durations = timeline.durations();
        assert!(durations["run_dbt_build"] >= Duration::from_millis(40));
        assert_eq!(timeline.retries("run_dbt_build"), 1);
    }

    #[test]
    fn test_unfinished_step_has_no_duration() {
        let mut timeline = RunTimeline::new();
        timeline.record("prepare_dbt_repo", EventKind::Started);
        assert!(!timeline.durations().contains_key("prepare_dbt_repo"));
    }

    #[test]
    fn test_chart_marks_failures_and_skips() {
        let mut timeline = RunTimeline::new();
        timeline.record("prepare_dbt_repo", EventKind::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.record("prepare_dbt_repo", EventKind::Succeeded);
        timeline.record("run_dbt_deps", EventKind::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.record("run_dbt_deps", EventKind::Failed);
        timeline.record("run_dbt_build", EventKind::Skipped);

        let chart = timeline.chart();
        assert!(chart.contains("prepare_dbt_repo |"));
        assert!(chart.contains('#'));
        assert!(chart.contains('x'));
        assert!(chart.contains("run_dbt_build    | skipped"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_pad() {
        assert_eq!(pad("abc", 5), "abc  ");
        assert_eq!(pad("abcdefgh", 6), "abc...");
    }
}
