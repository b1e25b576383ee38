//! Run lifecycle events emitted to external observers
//!
//! Consumers subscribe through [`crate::engine::WorkflowEngine::subscribe`];
//! the engine never requires a consumer to exist and drops events when no
//! receiver is attached.

use serde::Serialize;

use crate::definition::WorkflowId;
use crate::run::{RunId, WorkflowLog};
use crate::step::StepId;

/// Capacity of the broadcast channel behind [`crate::engine::WorkflowEngine::subscribe`]
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event emitted by the engine during registration and run execution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A workflow definition was registered or replaced
    WorkflowRegistered {
        /// Registered workflow id
        workflow_id: WorkflowId,
    },
    /// A run moved to `running`
    RunStarted {
        /// Run id
        run_id: RunId,
        /// Workflow id
        workflow_id: WorkflowId,
    },
    /// A run finished successfully
    RunCompleted {
        /// Run id
        run_id: RunId,
        /// Workflow id
        workflow_id: WorkflowId,
    },
    /// A run failed with an unrecovered error
    RunFailed {
        /// Run id
        run_id: RunId,
        /// Workflow id
        workflow_id: WorkflowId,
        /// First unrecovered error message
        error: String,
    },
    /// A run was cancelled
    RunCancelled {
        /// Run id
        run_id: RunId,
        /// Workflow id
        workflow_id: WorkflowId,
    },
    /// A step began executing
    StepStarted {
        /// Run id
        run_id: RunId,
        /// Step id
        step_id: StepId,
    },
    /// A step finished successfully
    StepCompleted {
        /// Run id
        run_id: RunId,
        /// Step id
        step_id: StepId,
    },
    /// A step failed
    StepFailed {
        /// Run id
        run_id: RunId,
        /// Step id
        step_id: StepId,
        /// Error message
        error: String,
    },
    /// An approval gate is waiting for a decision
    ApprovalRequired {
        /// Run id
        run_id: RunId,
        /// Approval step id
        step_id: StepId,
        /// Message for approvers
        message: String,
        /// Configured approvers
        approvers: Vec<String>,
    },
    /// A log line was appended to a run
    Log {
        /// Run id
        run_id: RunId,
        /// The appended entry
        entry: WorkflowLog,
    },
}
