//! Workflow step types and per-variant configuration

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur when creating step-related types
#[derive(Debug, Error)]
pub enum StepError {
    /// Step ID cannot be empty or whitespace only
    #[error("Step ID cannot be empty or whitespace only")]
    EmptyStepId,
}

/// Unique identifier for a step within its containing step list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(String);

impl StepId {
    /// Create a new step ID
    ///
    /// # Panics
    /// Panics if the ID is empty or whitespace only. For non-panicking
    /// creation, use `try_new` instead.
    pub fn new(id: impl Into<String>) -> Self {
        Self::try_new(id).expect("Step ID cannot be empty or whitespace only")
    }

    /// Create a new step ID, returning an error for invalid input
    pub fn try_new(id: impl Into<String>) -> Result<Self, StepError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(StepError::EmptyStepId);
        }
        Ok(Self(id))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One node in a workflow's step graph
///
/// Common scheduling fields live here; everything variant-specific is in
/// [`StepConfig`]. `depends_on` may only name sibling steps in the same
/// containing list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Identifier, unique among siblings in the same step list
    pub id: StepId,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Sibling step ids that must reach a terminal result first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<StepId>,
    /// Per-step timeout in milliseconds; no implicit default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Additional attempts after the first failure
    #[serde(default)]
    pub retries: u32,
    /// Record a failure without aborting the containing step list
    #[serde(default)]
    pub continue_on_error: bool,
    /// Variant-specific configuration
    #[serde(flatten)]
    pub config: StepConfig,
}

impl WorkflowStep {
    /// Create a task step invoking the named action
    pub fn task(id: impl Into<StepId>, action: impl Into<String>) -> Self {
        Self::with_config(
            id,
            StepConfig::Task(TaskConfig {
                action: action.into(),
                params: Map::new(),
                outputs: Vec::new(),
            }),
        )
    }

    /// Create a parallel step over the given nested steps
    pub fn parallel(id: impl Into<StepId>, steps: Vec<WorkflowStep>) -> Self {
        Self::with_config(
            id,
            StepConfig::Parallel(ParallelConfig {
                steps,
                max_concurrency: None,
                fail_fast: false,
            }),
        )
    }

    /// Create a conditional step with an `ifTrue` branch
    pub fn conditional(
        id: impl Into<StepId>,
        condition: impl Into<String>,
        if_true: Vec<WorkflowStep>,
    ) -> Self {
        Self::with_config(
            id,
            StepConfig::Conditional(ConditionalConfig {
                condition: condition.into(),
                if_true,
                if_false: Vec::new(),
            }),
        )
    }

    /// Create an approval gate step
    pub fn approval(id: impl Into<StepId>, message: impl Into<String>) -> Self {
        Self::with_config(
            id,
            StepConfig::Approval(ApprovalConfig {
                approvers: Vec::new(),
                message: message.into(),
                auto_approve: None,
            }),
        )
    }

    /// Create a notification step
    pub fn notification(
        id: impl Into<StepId>,
        channel: NotificationChannel,
        target: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self::with_config(
            id,
            StepConfig::Notification(NotificationConfig {
                channel,
                target: target.into(),
                template: template.into(),
            }),
        )
    }

    fn with_config(id: impl Into<StepId>, config: StepConfig) -> Self {
        let id = id.into();
        Self {
            name: id.as_str().to_string(),
            id,
            depends_on: Vec::new(),
            timeout_ms: None,
            retries: 0,
            continue_on_error: false,
            config,
        }
    }

    /// Set the human-readable name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Declare sibling dependencies
    pub fn with_depends_on(mut self, ids: impl IntoIterator<Item = impl Into<StepId>>) -> Self {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the step timeout in milliseconds
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the retry budget (additional attempts after the first)
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Keep scheduling siblings even if this step fails
    pub fn with_continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Add a parameter (task steps only; ignored otherwise)
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let StepConfig::Task(cfg) = &mut self.config {
            cfg.params.insert(key.into(), value.into());
        }
        self
    }

    /// Declare output names to copy from the action result (task steps only)
    pub fn with_outputs(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let StepConfig::Task(cfg) = &mut self.config {
            cfg.outputs = names.into_iter().map(Into::into).collect();
        }
        self
    }

    /// The step variant name, as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match &self.config {
            StepConfig::Task(_) => "task",
            StepConfig::Parallel(_) => "parallel",
            StepConfig::Conditional(_) => "conditional",
            StepConfig::Approval(_) => "approval",
            StepConfig::Notification(_) => "notification",
        }
    }
}

/// Closed set of step variants, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepConfig {
    /// Invoke a registered action with parameters
    Task(TaskConfig),
    /// Execute nested steps concurrently in bounded batches
    Parallel(ParallelConfig),
    /// Branch on a condition expression
    Conditional(ConditionalConfig),
    /// Pause for a human (or auto) approval decision
    Approval(ApprovalConfig),
    /// Render a template and dispatch it through a notification action
    Notification(NotificationConfig),
}

/// Configuration for task steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Registered action name, e.g. `shell.run`
    pub action: String,
    /// Parameters handed to the action; string values support `${{ ... }}`
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    /// Names to copy from the action's object result into the run outputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

/// Configuration for parallel steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelConfig {
    /// Nested member steps
    pub steps: Vec<WorkflowStep>,
    /// Batch size; defaults to the member count (unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Abort the whole step on the first member error
    #[serde(default)]
    pub fail_fast: bool,
}

/// Configuration for conditional steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalConfig {
    /// Condition expression, e.g. `outputs.count > 5`
    pub condition: String,
    /// Steps scheduled when the condition holds
    #[serde(default)]
    pub if_true: Vec<WorkflowStep>,
    /// Steps scheduled otherwise; may be empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub if_false: Vec<WorkflowStep>,
}

/// Configuration for approval steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalConfig {
    /// Who may approve; informational for the approval collaborator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvers: Vec<String>,
    /// Message shown to approvers
    pub message: String,
    /// Environments that skip the human gate entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approve: Option<AutoApprove>,
}

/// Auto-approval rule for approval steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoApprove {
    /// Environment names (matched against the run's `environment` output)
    pub environments: Vec<String>,
}

/// Configuration for notification steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    /// Delivery channel
    pub channel: NotificationChannel,
    /// Channel-specific target: Slack channel, email address, webhook URL
    pub target: String,
    /// Message template; supports `{{ env.X }}` and `{{ outputs.X }}`
    pub template: String,
}

/// Supported notification channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    /// Slack message
    Slack,
    /// Email message
    Email,
    /// Generic webhook POST
    Webhook,
}

impl NotificationChannel {
    /// Name of the registry action this channel delegates to
    pub fn action_name(&self) -> &'static str {
        match self {
            NotificationChannel::Slack => "notify.slack",
            NotificationChannel::Email => "notify.email",
            NotificationChannel::Webhook => "http.request",
        }
    }
}
