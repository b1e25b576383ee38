//! # OpsFlow
//!
//! A workflow execution engine for multi-step DevOps automation.
//!
//! Workflows are declarative definitions of steps (task, parallel,
//! conditional, approval, notification) with sibling dependencies; the
//! engine turns one into a running, dependency-ordered, partially-parallel
//! execution with retry, timeout and failure-hook semantics.
//!
//! ## Features
//!
//! - **Readiness scheduling**: sibling steps execute in dependency waves,
//!   with the readiness scan doubling as cycle detection
//! - **Five step variants**: pluggable task actions, bounded parallelism,
//!   conditional branching, human approval gates, notifications
//! - **Retry & timeout**: per-step linear-backoff retries and timeout races
//! - **Observability**: broadcast lifecycle events plus an append-only
//!   per-run log
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opsflow::{
//!     AutoApprover, RunOptions, Workflow, WorkflowEngine, WorkflowId, WorkflowStep,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = WorkflowEngine::new(Arc::new(AutoApprover::new()));
//!
//! let workflow = Workflow::new("release", "Release pipeline")
//!     .with_step(
//!         WorkflowStep::task("build", "shell.run").with_param("command", "make build"),
//!     )
//!     .with_step(
//!         WorkflowStep::task("deploy", "shell.run")
//!             .with_param("command", "make deploy")
//!             .with_depends_on(["build"])
//!             .with_retries(2),
//!     );
//! engine.register_workflow(workflow)?;
//!
//! let run = engine
//!     .execute(&WorkflowId::new("release"), RunOptions::default())
//!     .await?;
//! println!("{:?}", run.status);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Pluggable action system for task steps
pub mod actions;

/// Approval gate collaborators
pub mod approvals;

/// Shared run state and the per-step execution context
pub mod context;

/// Workflow definition types and structural validation
pub mod definition;

/// The workflow engine façade
pub mod engine;

/// Unified error handling
pub mod error;

/// Run lifecycle events
pub mod events;

/// Workflow execution core
pub mod executor;

/// Placeholder resolution and condition evaluation
pub mod expression;

/// Loading workflow definitions from YAML
pub mod parser;

/// Readiness-based dependency scheduling
pub mod scheduler;

/// Workflow step types
pub mod step;

/// Workflow runtime execution types
pub mod run;

pub use actions::{Action, ActionError, ActionRegistry, ActionResult};
pub use approvals::{
    ApprovalBroker, ApprovalDecision, ApprovalError, ApprovalHandler, ApprovalRequest,
    AutoApprover, AUTO_APPROVER,
};
pub use context::{ExecutionContext, RunHandle};
pub use definition::{DefinitionError, Workflow, WorkflowId, WorkflowTrigger};
pub use engine::WorkflowEngine;
pub use error::{OpsFlowError, Result};
pub use events::EngineEvent;
pub use executor::{ExecutorConfig, ExecutorError, ExecutorResult, WorkflowExecutor};
pub use parser::{workflow_from_yaml, workflow_from_yaml_file};
pub use run::{
    LogLevel, RunId, RunOptions, StepResult, StepStatus, WorkflowLog, WorkflowRun,
    WorkflowRunStatus,
};
pub use scheduler::SchedulerError;
pub use step::{
    ApprovalConfig, AutoApprove, ConditionalConfig, NotificationChannel, NotificationConfig,
    ParallelConfig, StepConfig, StepError, StepId, TaskConfig, WorkflowStep,
};
