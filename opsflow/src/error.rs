//! Unified error handling for the OpsFlow library
//!
//! Each subsystem carries its own typed error (`ExecutorError`, `ActionError`,
//! `SchedulerError`, ...); this module provides the crate-level error those
//! roll up into at the public API boundary.

use thiserror::Error;

use crate::executor::ExecutorError;

/// The main error type for the OpsFlow library
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OpsFlowError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Workflow not found in the engine's workflow table
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Workflow run not found in the engine's run table
    #[error("Workflow run not found: {0}")]
    RunNotFound(String),

    /// A workflow definition failed structural validation
    #[error("Invalid workflow '{id}': {reasons}")]
    InvalidWorkflow {
        /// Id of the rejected workflow
        id: String,
        /// Validation failures, joined with "; "
        reasons: String,
    },

    /// A run failed during execution
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias using [`OpsFlowError`]
pub type Result<T> = std::result::Result<T, OpsFlowError>;
