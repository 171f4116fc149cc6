//! Workflow Validation
//!
//! Checks that a workflow is something the engine can run:
//! - every step has an ID and an action
//! - references point at existing steps and agree in both directions
//! - the steps form one linear chain
//! - the schedule parses
//!
//! On success the steps are reordered to follow the chain.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use thiserror::Error;

use super::model::{Step, StepAction, Workflow};
use super::schedule::CronSchedule;
use crate::error::{PipelineError, Result};

/// A single problem found in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow has no steps")]
    EmptyWorkflow,
    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(String),
    #[error("step has empty or whitespace-only ID")]
    EmptyStepId,
    #[error("step '{0}' has an empty command")]
    EmptyCommand(String),
    #[error("step '{step}' references unknown step '{reference}'")]
    InvalidReference { step: String, reference: String },
    #[error("step '{step}' lists '{other}' as {direction} but '{other}' does not link back")]
    OneSidedLink {
        step: String,
        other: String,
        direction: &'static str,
    },
    #[error("step '{0}' has more than one upstream or downstream step; only linear pipelines are supported")]
    Branching(String),
    #[error("workflow must have exactly one root step, found {0}")]
    RootCount(usize),
    #[error("workflow contains a cycle or unreachable steps")]
    Unreachable,
    #[error("depends_on_past is not supported; runs never wait on earlier runs")]
    DependsOnPast,
}

fn validate_step(step: &Step, known: &HashSet<&str>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.id.trim().is_empty() {
        errors.push(ValidationError::EmptyStepId);
        return errors;
    }

    if let StepAction::Shell { command } = &step.action {
        if command.trim().is_empty() {
            errors.push(ValidationError::EmptyCommand(step.id.clone()));
        }
    }

    for reference in step.previous.iter().chain(step.next.iter()) {
        if !known.contains(reference.as_str()) {
            errors.push(ValidationError::InvalidReference {
                step: step.id.clone(),
                reference: reference.clone(),
            });
        }
    }

    if step.previous.len() > 1 || step.next.len() > 1 {
        errors.push(ValidationError::Branching(step.id.clone()));
    }

    errors
}

fn check_link_symmetry(workflow: &Workflow) -> Vec<ValidationError> {
    let by_id: HashMap<&str, &Step> = workflow.steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut errors = Vec::new();

    for step in &workflow.steps {
        for next_id in &step.next {
            if let Some(next) = by_id.get(next_id.as_str()) {
                if !next.previous.contains(&step.id) {
                    errors.push(ValidationError::OneSidedLink {
                        step: step.id.clone(),
                        other: next_id.clone(),
                        direction: "next",
                    });
                }
            }
        }
        for prev_id in &step.previous {
            if let Some(prev) = by_id.get(prev_id.as_str()) {
                if !prev.next.contains(&step.id) {
                    errors.push(ValidationError::OneSidedLink {
                        step: step.id.clone(),
                        other: prev_id.clone(),
                        direction: "previous",
                    });
                }
            }
        }
    }

    errors
}

/// Validates the workflow and puts its steps in chain order.
pub fn validate_workflow(workflow: &mut Workflow) -> Result<()> {
    info!("Validating workflow '{}' with {} steps", workflow.id, workflow.steps.len());

    CronSchedule::parse(&workflow.schedule)?;

    if workflow.depends_on_past {
        return Err(invalid(vec![ValidationError::DependsOnPast]));
    }

    if workflow.steps.is_empty() {
        return Err(invalid(vec![ValidationError::EmptyWorkflow]));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(invalid(vec![ValidationError::DuplicateStepId(step.id.clone())]));
        }
    }

    let mut errors: Vec<ValidationError> = workflow
        .steps
        .iter()
        .flat_map(|step| validate_step(step, &seen))
        .collect();
    errors.extend(check_link_symmetry(workflow));

    if !errors.is_empty() {
        return Err(invalid(errors));
    }

    order_chain(workflow)?;

    info!("Workflow validated: {}", workflow.step_ids().join(" >> "));
    Ok(())
}

/// Walks the chain from its single root and reorders the steps to match.
fn order_chain(workflow: &mut Workflow) -> Result<()> {
    let roots: Vec<String> = workflow.root_steps().iter().map(|s| s.id.clone()).collect();
    if roots.len() != 1 {
        return Err(invalid(vec![ValidationError::RootCount(roots.len())]));
    }

    let mut order = Vec::with_capacity(workflow.steps.len());
    let mut visited = HashSet::new();
    let mut current = Some(roots[0].clone());

    while let Some(id) = current {
        if !visited.insert(id.clone()) {
            return Err(invalid(vec![ValidationError::Unreachable]));
        }
        current = workflow.get_step(&id).and_then(|s| s.next.first().cloned());
        order.push(id);
    }

    if order.len() != workflow.steps.len() {
        return Err(invalid(vec![ValidationError::Unreachable]));
    }

    let mut by_id: HashMap<String, Step> =
        workflow.steps.drain(..).map(|s| (s.id.clone(), s)).collect();
    workflow.steps = order.iter().filter_map(|id| by_id.remove(id)).collect();

    debug!("Chain order: {:?}", order);
    Ok(())
}

fn invalid(errors: Vec<ValidationError>) -> PipelineError {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    PipelineError::Validation(messages.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn workflow_with(steps: Vec<Step>) -> Workflow {
        let mut workflow = Workflow::new(
            "wf",
            "0 3 * * *",
            Utc.with_ymd_and_hms(2025, 1, 23, 0, 0, 0).unwrap(),
        );
        workflow.steps = steps;
        workflow
    }

    fn linked(id: &str, previous: &[&str], next: &[&str]) -> Step {
        let mut step = Step::shell(id, "true");
        step.previous = previous.iter().map(|s| s.to_string()).collect();
        step.next = next.iter().map(|s| s.to_string()).collect();
        step
    }

    #[test]
    fn test_valid_chain_is_reordered() {
        let mut workflow = workflow_with(vec![
            linked("c", &["b"], &[]),
            linked("a", &[], &["b"]),
            linked("b", &["a"], &["c"]),
        ]);

        validate_workflow(&mut workflow).unwrap();
        assert_eq!(workflow.step_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_single_step_is_valid() {
        let mut workflow = workflow_with(vec![Step::shell("only", "echo hi")]);
        assert!(validate_workflow(&mut workflow).is_ok());
    }

    #[test]
    fn test_empty_workflow() {
        let mut workflow = workflow_with(vec![]);
        let err = validate_workflow(&mut workflow).unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_depends_on_past_is_rejected() {
        let mut workflow = workflow_with(vec![Step::shell("only", "true")]);
        workflow.depends_on_past = true;
        let err = validate_workflow(&mut workflow).unwrap_err();
        assert!(err.to_string().contains("depends_on_past"));
    }

    #[test]
    fn test_duplicate_ids() {
        let mut workflow = workflow_with(vec![Step::shell("a", "true"), Step::shell("a", "true")]);
        let err = validate_workflow(&mut workflow).unwrap_err();
        assert!(err.to_string().contains("duplicate step ID"));
    }

    #[test]
    fn test_empty_command() {
        let mut workflow = workflow_with(vec![Step::shell("a", "   ")]);
        let err = validate_workflow(&mut workflow).unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[test]
    fn test_unknown_reference() {
        let mut workflow = workflow_with(vec![linked("a", &[], &["ghost"])]);
        let err = validate_workflow(&mut workflow).unwrap_err();
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[test]
    fn test_one_sided_link() {
        let mut workflow = workflow_with(vec![linked("a", &[], &["b"]), linked("b", &[], &[])]);
        let err = validate_workflow(&mut workflow).unwrap_err();
        assert!(err.to_string().contains("does not link back"));
    }

    #[test]
    fn test_fan_out_rejected() {
        let mut workflow = workflow_with(vec![
            linked("a", &[], &["b", "c"]),
            linked("b", &["a"], &[]),
            linked("c", &["a"], &[]),
        ]);
        let err = validate_workflow(&mut workflow).unwrap_err();
        assert!(err.to_string().contains("only linear pipelines"));
    }

    #[test]
    fn test_two_roots_rejected() {
        let mut workflow = workflow_with(vec![Step::shell("a", "true"), Step::shell("b", "true")]);
        let err = validate_workflow(&mut workflow).unwrap_err();
        assert!(err.to_string().contains("exactly one root step, found 2"));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut workflow = workflow_with(vec![
            linked("root", &[], &["a"]),
            linked("a", &["root"], &[]),
            linked("b", &["c"], &["c"]),
            linked("c", &["b"], &["b"]),
        ]);
        let err = validate_workflow(&mut workflow).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_bad_schedule_rejected() {
        let mut workflow = workflow_with(vec![Step::shell("a", "true")]);
        workflow.schedule = "every day".to_string();
        assert!(matches!(
            validate_workflow(&mut workflow),
            Err(PipelineError::Schedule { .. })
        ));
    }
}
