//! Workflow definition types and structural validation

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::scheduler;
use crate::step::{StepConfig, StepId, WorkflowStep};

/// Errors that can occur when creating workflow-related types
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// Workflow id cannot be empty or whitespace only
    #[error("Workflow id cannot be empty or whitespace only")]
    EmptyWorkflowId,
}

/// Unique identifier for workflow definitions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Create a new workflow id
    ///
    /// # Panics
    /// Panics if the id is empty or whitespace only. For non-panicking
    /// creation, use `try_new` instead.
    pub fn new(id: impl Into<String>) -> Self {
        Self::try_new(id).expect("Workflow id cannot be empty or whitespace only")
    }

    /// Create a new workflow id, returning an error for invalid input
    pub fn try_new(id: impl Into<String>) -> Result<Self, DefinitionError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DefinitionError::EmptyWorkflowId);
        }
        Ok(Self(id))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What caused a workflow to start; carried as data only, the engine never
/// fires triggers itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkflowTrigger {
    /// Started explicitly by a caller
    Manual,
    /// Started on a branch push
    Push {
        /// Branch the push landed on
        branch: String,
    },
    /// Started on a cron schedule
    Schedule {
        /// Cron expression
        cron: String,
    },
    /// Started by an incoming webhook
    Webhook {
        /// Webhook path
        path: String,
    },
}

/// Immutable workflow definition
///
/// Created once at registration time and never mutated; the engine's workflow
/// table owns it, keyed by id and overwritten on re-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique identifier used for registration and execution
    pub id: WorkflowId,
    /// Human-readable name
    pub name: String,
    /// Definition version string
    #[serde(default)]
    pub version: String,
    /// Declared triggers; informational
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<WorkflowTrigger>,
    /// Default environment variables, overridable per run
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Top-level step sequence
    pub steps: Vec<WorkflowStep>,
    /// Hook steps run after the main graph succeeds; failures are logged only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<WorkflowStep>,
    /// Hook steps run after the main graph fails; failures are swallowed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<WorkflowStep>,
}

impl Workflow {
    /// Create a new empty workflow definition
    pub fn new(id: impl Into<WorkflowId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: String::new(),
            triggers: Vec::new(),
            env: HashMap::new(),
            steps: Vec::new(),
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }

    /// Set the version string
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set a default environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Append a top-level step
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append an `onSuccess` hook step
    pub fn with_on_success(mut self, step: WorkflowStep) -> Self {
        self.on_success.push(step);
        self
    }

    /// Append an `onFailure` hook step
    pub fn with_on_failure(mut self, step: WorkflowStep) -> Self {
        self.on_failure.push(step);
        self
    }

    /// Validate the workflow structure
    ///
    /// Checks, recursively through nested step lists: non-empty name, unique
    /// sibling step ids, `dependsOn` referencing existing siblings only, no
    /// `dependsOn` inside parallel members (those run in batches, not waves),
    /// and no dependency cycles among top-level or branch siblings.
    pub fn validate_structure(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Workflow name cannot be empty".to_string());
        }
        if self.steps.is_empty() {
            errors.push("Workflow must declare at least one step".to_string());
        }

        validate_step_list(&self.steps, "steps", false, &mut errors);
        validate_step_list(&self.on_success, "onSuccess", false, &mut errors);
        validate_step_list(&self.on_failure, "onFailure", false, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_step_list(
    steps: &[WorkflowStep],
    path: &str,
    inside_parallel: bool,
    errors: &mut Vec<String>,
) {
    let mut seen: HashSet<&StepId> = HashSet::new();
    for step in steps {
        if step.id.as_str().trim().is_empty() {
            errors.push(format!("{path}: step with empty id"));
        }
        if !seen.insert(&step.id) {
            errors.push(format!("{path}: duplicate step id '{}'", step.id));
        }
    }

    let ids: HashSet<&StepId> = steps.iter().map(|s| &s.id).collect();
    for step in steps {
        for dep in &step.depends_on {
            if inside_parallel {
                errors.push(format!(
                    "{path}.{}: dependsOn is not supported inside parallel steps",
                    step.id
                ));
                break;
            }
            if dep == &step.id {
                errors.push(format!("{path}.{}: step depends on itself", step.id));
            } else if !ids.contains(dep) {
                errors.push(format!(
                    "{path}.{}: dependsOn references unknown sibling '{dep}'",
                    step.id
                ));
            }
        }

        match &step.config {
            StepConfig::Parallel(cfg) => {
                validate_step_list(
                    &cfg.steps,
                    &format!("{path}.{}.steps", step.id),
                    true,
                    errors,
                );
                if cfg.steps.is_empty() {
                    errors.push(format!("{path}.{}: parallel step has no members", step.id));
                }
            }
            StepConfig::Conditional(cfg) => {
                validate_step_list(
                    &cfg.if_true,
                    &format!("{path}.{}.ifTrue", step.id),
                    false,
                    errors,
                );
                validate_step_list(
                    &cfg.if_false,
                    &format!("{path}.{}.ifFalse", step.id),
                    false,
                    errors,
                );
            }
            StepConfig::Task(_) | StepConfig::Approval(_) | StepConfig::Notification(_) => {}
        }
    }

    // The readiness scan doubles as cycle detection; run it here so broken
    // definitions are rejected at registration instead of mid-run.
    if !inside_parallel {
        if let Some(stuck) = scheduler::detect_cycle(steps) {
            let ids: Vec<&str> = stuck.iter().map(|s| s.as_str()).collect();
            errors.push(format!(
                "{path}: circular dependency among steps: {}",
                ids.join(", ")
            ));
        }
    }
}
