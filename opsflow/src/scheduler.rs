//! Readiness-based dependency scheduling for sibling step lists
//!
//! No explicit topological sort: the executor repeatedly asks for the subset
//! of pending steps whose dependencies are all complete (a "wave"), runs that
//! wave concurrently, then scans again. An empty wave with steps still
//! pending means the dependency graph can never make progress, which doubles
//! as cycle detection.

use std::collections::HashSet;
use thiserror::Error;

use crate::step::{StepId, WorkflowStep};

/// Errors produced by the scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The readiness scan stalled: the remaining steps depend on each other
    /// (or on ids that can never complete)
    #[error("circular dependency among steps: {}", join_ids(stuck))]
    CircularDependency {
        /// Steps that can never become ready
        stuck: Vec<StepId>,
    },
}

fn join_ids(ids: &[StepId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compute the next wave: every pending step whose `dependsOn` is a subset of
/// the completed set
///
/// Any terminal step result (success, failed-but-continued, skipped) counts
/// as completed for readiness purposes. The order of the returned slice
/// carries no execution guarantee; wave members conceptually fire together.
pub fn ready_wave<'a>(
    pending: &[&'a WorkflowStep],
    completed: &HashSet<StepId>,
) -> Vec<&'a WorkflowStep> {
    pending
        .iter()
        .filter(|step| step.depends_on.iter().all(|dep| completed.contains(dep)))
        .copied()
        .collect()
}

/// Simulate the readiness scan without executing anything
///
/// Returns the set of steps that can never become ready, or `None` for an
/// acyclic list. Used at registration time so structurally broken workflows
/// are rejected before a run ever starts.
pub fn detect_cycle(steps: &[WorkflowStep]) -> Option<Vec<StepId>> {
    let mut completed: HashSet<StepId> = HashSet::new();
    let mut pending: Vec<&WorkflowStep> = steps.iter().collect();

    while !pending.is_empty() {
        let wave = ready_wave(&pending, &completed);
        if wave.is_empty() {
            return Some(pending.iter().map(|s| s.id.clone()).collect());
        }
        for step in &wave {
            completed.insert(step.id.clone());
        }
        pending.retain(|s| !completed.contains(&s.id));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::WorkflowStep;

    fn task(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep::task(id, "core.log").with_depends_on(deps.iter().copied())
    }

    fn ids(steps: &[&WorkflowStep]) -> Vec<String> {
        steps.iter().map(|s| s.id.as_str().to_string()).collect()
    }

    #[test]
    fn test_independent_steps_are_one_wave() {
        let steps = vec![task("a", &[]), task("b", &[]), task("c", &[])];
        let pending: Vec<&WorkflowStep> = steps.iter().collect();
        let wave = ready_wave(&pending, &HashSet::new());
        assert_eq!(ids(&wave), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_dependency_waves() {
        let steps = vec![
            task("build", &[]),
            task("test-api", &["build"]),
            task("test-ui", &["build"]),
            task("deploy", &["test-api", "test-ui"]),
        ];
        let mut completed = HashSet::new();
        let mut pending: Vec<&WorkflowStep> = steps.iter().collect();

        let wave = ready_wave(&pending, &completed);
        assert_eq!(ids(&wave), vec!["build"]);
        completed.insert(StepId::new("build"));
        pending.retain(|s| !completed.contains(&s.id));

        let wave = ready_wave(&pending, &completed);
        assert_eq!(ids(&wave), vec!["test-api", "test-ui"]);
        completed.insert(StepId::new("test-api"));
        completed.insert(StepId::new("test-ui"));
        pending.retain(|s| !completed.contains(&s.id));

        let wave = ready_wave(&pending, &completed);
        assert_eq!(ids(&wave), vec!["deploy"]);
    }

    #[test]
    fn test_detect_cycle_two_step_loop() {
        let steps = vec![task("a", &["b"]), task("b", &["a"])];
        let stuck = detect_cycle(&steps).unwrap();
        assert_eq!(stuck.len(), 2);
    }

    #[test]
    fn test_detect_cycle_reports_only_stuck_steps() {
        let steps = vec![task("ok", &[]), task("x", &["y"]), task("y", &["x"])];
        let stuck = detect_cycle(&steps).unwrap();
        assert_eq!(
            stuck.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            vec!["x", "y"]
        );
    }

    #[test]
    fn test_detect_cycle_acyclic() {
        let steps = vec![task("a", &[]), task("b", &["a"])];
        assert!(detect_cycle(&steps).is_none());
    }

    #[test]
    fn test_unknown_dependency_reported_as_stuck() {
        let steps = vec![task("a", &["ghost"])];
        let stuck = detect_cycle(&steps).unwrap();
        assert_eq!(stuck[0].as_str(), "a");
    }

    #[test]
    fn test_circular_dependency_error_message() {
        let err = SchedulerError::CircularDependency {
            stuck: vec![StepId::new("a"), StepId::new("b")],
        };
        assert_eq!(err.to_string(), "circular dependency among steps: a, b");
    }
}
