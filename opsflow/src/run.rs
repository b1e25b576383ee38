//! Workflow runtime execution types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use ulid::Ulid;

use crate::definition::WorkflowId;
use crate::step::StepId;

/// Unique identifier for workflow runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Ulid);

impl RunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a RunId from its string representation
    pub fn parse(s: &str) -> Result<Self, String> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| format!("Invalid run ID '{s}': {e}"))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a workflow run
///
/// `Pending → Running → {Success, Failed, Cancelled}`, with
/// `Running ⇄ WaitingApproval` while an approval gate is open. The three
/// completion states are terminal; a finished run never resurrects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    /// Created but not yet scheduled
    Pending,
    /// Steps are being scheduled and executed
    Running,
    /// Suspended on an approval gate
    WaitingApproval,
    /// All steps and hooks finished successfully
    Success,
    /// An unrecovered step error ended the run
    Failed,
    /// The run was cancelled; in-flight steps were not interrupted
    Cancelled,
}

impl WorkflowRunStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowRunStatus::Success | WorkflowRunStatus::Failed | WorkflowRunStatus::Cancelled
        )
    }
}

/// Status of a single step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started
    Pending,
    /// Currently executing
    Running,
    /// Finished successfully
    Success,
    /// Finished with an error
    Failed,
    /// Never ran because its containing list aborted or was bypassed
    Skipped,
}

impl StepStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Per-step execution record
///
/// Created when the step begins; status only ever moves forward
/// (`pending → running → {success, failed, skipped}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Step this record belongs to
    pub step_id: StepId,
    /// Current status
    pub status: StepStatus,
    /// When the step started
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// When the step reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Value produced by the step
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    /// Error message of the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How many retry attempts were made after the first
    #[serde(default)]
    pub retry_count: u32,
}

impl StepResult {
    /// Create a record in the `Running` state
    pub fn running(step_id: StepId) -> Self {
        Self {
            step_id,
            status: StepStatus::Running,
            started_at: chrono::Utc::now(),
            completed_at: None,
            output: Value::Null,
            error: None,
            retry_count: 0,
        }
    }

    /// Create a record already in the `Skipped` state
    pub fn skipped(step_id: StepId) -> Self {
        let now = chrono::Utc::now();
        Self {
            step_id,
            status: StepStatus::Skipped,
            started_at: now,
            completed_at: Some(now),
            output: Value::Null,
            error: None,
            retry_count: 0,
        }
    }
}

/// Severity of a workflow log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Informational
    Info,
    /// Something unexpected but recoverable
    Warning,
    /// A failure
    Error,
}

/// One append-only log line owned by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowLog {
    /// When the line was appended
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Severity
    pub level: LogLevel,
    /// Step that produced the line, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    /// Message text
    pub message: String,
    /// Optional structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Per-execution options accepted at the engine boundary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Environment overrides, merged over the workflow's defaults
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Actor that started the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    /// Trigger description, e.g. `manual` or `push:main`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl RunOptions {
    /// Set an environment override
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the triggering actor
    pub fn with_triggered_by(mut self, actor: impl Into<String>) -> Self {
        self.triggered_by = Some(actor.into());
        self
    }

    /// Set the trigger description
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }
}

/// Snapshot of one execution instance of a workflow
///
/// The live, mutable state lives behind the run handle; this is the owned
/// view handed to callers by `execute`, `get_run` and `list_runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    /// Unique identifier for this run
    pub id: RunId,
    /// Workflow this run executes
    pub workflow_id: WorkflowId,
    /// Run status
    pub status: WorkflowRunStatus,
    /// Actor that started the run
    pub triggered_by: Option<String>,
    /// Trigger description
    pub trigger: Option<String>,
    /// When the run was created
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// When the run reached a terminal status
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Execution record per step id
    pub step_results: HashMap<StepId, StepResult>,
    /// Accumulated outputs; keys are `stepId.outputKey` plus a bare
    /// `outputKey` form where the last writer wins
    pub outputs: HashMap<String, Value>,
    /// Append-only log sequence
    pub logs: Vec<WorkflowLog>,
    /// Message of the first unrecovered step error
    pub error: Option<String>,
}
