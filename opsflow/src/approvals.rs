//! Approval gate collaborators
//!
//! Approval steps suspend a run until a decision arrives. The engine does not
//! decide on its own: an [`ApprovalHandler`] is a required constructor
//! argument, so the choice to auto-approve is always explicit
//! ([`AutoApprover`]) rather than a silent fallback. [`ApprovalBroker`] is
//! the externally-driven handler for UIs and chat-ops integrations.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::definition::WorkflowId;
use crate::run::RunId;
use crate::step::StepId;

/// Approver name recorded when an auto-approve rule matched
pub const AUTO_APPROVER: &str = "auto-approve";

/// Errors produced while obtaining an approval decision
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The pending request was dropped before a decision arrived
    #[error("approval channel closed before a decision arrived")]
    ChannelClosed,
    /// A decision was submitted for a request that is not waiting
    #[error("no pending approval for run {run_id} step {step_id}")]
    NotPending {
        /// Run the decision was submitted for
        run_id: RunId,
        /// Step the decision was submitted for
        step_id: StepId,
    },
    /// The handler itself failed
    #[error("approval handler failed: {0}")]
    Handler(String),
}

/// An approval request handed to the configured handler
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// Run waiting on the decision
    pub run_id: RunId,
    /// Workflow the run executes
    pub workflow_id: WorkflowId,
    /// The approval step
    pub step_id: StepId,
    /// Message for approvers
    pub message: String,
    /// Configured approvers; informational
    pub approvers: Vec<String>,
}

/// A decision resolving an approval request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    /// Whether the gate opens
    pub approved: bool,
    /// Who decided
    pub approver: String,
    /// Optional free-form comment
    pub comment: Option<String>,
}

impl ApprovalDecision {
    /// An approving decision
    pub fn approved(approver: impl Into<String>) -> Self {
        Self {
            approved: true,
            approver: approver.into(),
            comment: None,
        }
    }

    /// A rejecting decision
    pub fn rejected(approver: impl Into<String>) -> Self {
        Self {
            approved: false,
            approver: approver.into(),
            comment: None,
        }
    }

    /// Attach a comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Collaborator that resolves approval requests
///
/// The future returned by `request` is raced against run cancellation;
/// handlers must tolerate being dropped without a decision.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Obtain a decision for the given request
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalDecision, ApprovalError>;
}

/// Handler that approves every request immediately
///
/// Useful for tests, local runs and CI pipelines where the gate is a
/// formality. Using it is an explicit choice at engine construction.
pub struct AutoApprover {
    approver: String,
}

impl AutoApprover {
    /// Approve as [`AUTO_APPROVER`]
    pub fn new() -> Self {
        Self {
            approver: AUTO_APPROVER.to_string(),
        }
    }

    /// Approve under a custom approver name
    pub fn with_approver(approver: impl Into<String>) -> Self {
        Self {
            approver: approver.into(),
        }
    }
}

impl Default for AutoApprover {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalHandler for AutoApprover {
    async fn request(&self, _request: ApprovalRequest) -> Result<ApprovalDecision, ApprovalError> {
        Ok(ApprovalDecision::approved(self.approver.clone()))
    }
}

/// Externally-driven approval handler
///
/// `request` parks the run on a oneshot channel; some outside caller (UI,
/// chat bot, API endpoint) later calls [`ApprovalBroker::submit`] with the
/// decision. Requests abandoned by cancellation surface as
/// [`ApprovalError::NotPending`] when a late decision arrives.
pub struct ApprovalBroker {
    pending: DashMap<(RunId, StepId), oneshot::Sender<ApprovalDecision>>,
}

impl ApprovalBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Resolve a pending request with a decision
    pub fn submit(
        &self,
        run_id: RunId,
        step_id: &StepId,
        decision: ApprovalDecision,
    ) -> Result<(), ApprovalError> {
        let (_, sender) = self
            .pending
            .remove(&(run_id, step_id.clone()))
            .ok_or_else(|| ApprovalError::NotPending {
                run_id,
                step_id: step_id.clone(),
            })?;
        sender.send(decision).map_err(|_| ApprovalError::NotPending {
            run_id,
            step_id: step_id.clone(),
        })
    }

    /// Requests currently waiting for a decision
    pub fn pending(&self) -> Vec<(RunId, StepId)> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for ApprovalBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalHandler for ApprovalBroker {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalDecision, ApprovalError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert((request.run_id, request.step_id), tx);
        rx.await.map_err(|_| ApprovalError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request(run_id: RunId) -> ApprovalRequest {
        ApprovalRequest {
            run_id,
            workflow_id: WorkflowId::new("wf"),
            step_id: StepId::new("gate"),
            message: "deploy to production?".to_string(),
            approvers: vec!["alice".to_string()],
        }
    }

    #[tokio::test]
    async fn test_auto_approver() {
        let decision = AutoApprover::new().request(request(RunId::new())).await.unwrap();
        assert!(decision.approved);
        assert_eq!(decision.approver, AUTO_APPROVER);
    }

    #[tokio::test]
    async fn test_broker_submit_resolves_request() {
        let broker = Arc::new(ApprovalBroker::new());
        let run_id = RunId::new();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request(request(run_id)).await })
        };

        // Wait for the request to park itself.
        while broker.pending().is_empty() {
            tokio::task::yield_now().await;
        }

        broker
            .submit(
                run_id,
                &StepId::new("gate"),
                ApprovalDecision::approved("alice").with_comment("lgtm"),
            )
            .unwrap();

        let decision = waiter.await.unwrap().unwrap();
        assert!(decision.approved);
        assert_eq!(decision.approver, "alice");
        assert_eq!(decision.comment.as_deref(), Some("lgtm"));
        assert!(broker.pending().is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_pending_request() {
        let broker = ApprovalBroker::new();
        let err = broker
            .submit(
                RunId::new(),
                &StepId::new("gate"),
                ApprovalDecision::approved("alice"),
            )
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotPending { .. }));
    }

    #[tokio::test]
    async fn test_abandoned_request_rejects_late_decision() {
        let broker = Arc::new(ApprovalBroker::new());
        let run_id = RunId::new();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request(request(run_id)).await })
        };
        while broker.pending().is_empty() {
            tokio::task::yield_now().await;
        }

        // Simulates cancellation: the waiting future is dropped.
        waiter.abort();
        let _ = waiter.await;

        let err = broker
            .submit(run_id, &StepId::new("gate"), ApprovalDecision::approved("bob"))
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotPending { .. }));
    }
}
