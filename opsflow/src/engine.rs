//! The workflow engine façade
//!
//! [`WorkflowEngine`] is the entry point external callers use: it owns the
//! workflow, run and action tables, starts and cancels runs, and exposes
//! read-only projections over the run table. It is an explicit value owned
//! by its caller; construct one per process (or per test) and drop or
//! [`WorkflowEngine::shutdown`] it when done.

use std::sync::Arc;
use tokio::sync::broadcast;

use dashmap::DashMap;

use crate::actions::{Action, ActionRegistry};
use crate::approvals::ApprovalHandler;
use crate::context::RunHandle;
use crate::definition::{Workflow, WorkflowId};
use crate::error::{OpsFlowError, Result};
use crate::events::{EngineEvent, EVENT_CHANNEL_CAPACITY};
use crate::executor::{ExecutorConfig, WorkflowExecutor};
use crate::run::{RunId, RunOptions, WorkflowRun};

/// Registers workflows and actions, starts/cancels/queries runs
///
/// The approval collaborator is a required constructor argument: whether a
/// gate auto-approves ([`crate::approvals::AutoApprover`]) or waits for an
/// external decision ([`crate::approvals::ApprovalBroker`]) is always an
/// explicit wiring choice.
pub struct WorkflowEngine {
    workflows: DashMap<WorkflowId, Arc<Workflow>>,
    runs: DashMap<RunId, Arc<RunHandle>>,
    actions: Arc<ActionRegistry>,
    approvals: Arc<dyn ApprovalHandler>,
    events: broadcast::Sender<EngineEvent>,
    config: ExecutorConfig,
}

impl WorkflowEngine {
    /// Create an engine with the built-in actions and default configuration
    pub fn new(approvals: Arc<dyn ApprovalHandler>) -> Self {
        Self::with_config(approvals, ExecutorConfig::default())
    }

    /// Create an engine with explicit executor configuration
    pub fn with_config(approvals: Arc<dyn ApprovalHandler>, config: ExecutorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            workflows: DashMap::new(),
            runs: DashMap::new(),
            actions: Arc::new(ActionRegistry::with_builtins()),
            approvals,
            events,
            config,
        }
    }

    /// Subscribe to engine events; consumers are optional
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The action registry, for bulk or closure-based registration
    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Register (or replace) a custom action
    pub fn register_action(&self, name: impl Into<String>, action: Arc<dyn Action>) {
        self.actions.register(name, action);
    }

    /// Register a workflow definition
    ///
    /// Validates the structure first; re-registering an id overwrites the
    /// previous definition, and runs started afterwards use the new one.
    pub fn register_workflow(&self, workflow: Workflow) -> Result<()> {
        if let Err(reasons) = workflow.validate_structure() {
            return Err(OpsFlowError::InvalidWorkflow {
                id: workflow.id.to_string(),
                reasons: reasons.join("; "),
            });
        }
        tracing::info!(workflow = %workflow.id, "registered workflow");
        let _ = self.events.send(EngineEvent::WorkflowRegistered {
            workflow_id: workflow.id.clone(),
        });
        self.workflows
            .insert(workflow.id.clone(), Arc::new(workflow));
        Ok(())
    }

    /// Look up a registered workflow definition
    pub fn get_workflow(&self, id: &WorkflowId) -> Option<Arc<Workflow>> {
        self.workflows.get(id).map(|entry| entry.value().clone())
    }

    /// Execute a workflow to completion and return the final run snapshot
    ///
    /// The call is awaited to completion; a failed run is an `Ok` snapshot
    /// with `Failed` status, not an error. The only call-level error is an
    /// unknown workflow id.
    pub async fn execute(
        &self,
        workflow_id: &WorkflowId,
        options: RunOptions,
    ) -> Result<WorkflowRun> {
        let workflow = self
            .get_workflow(workflow_id)
            .ok_or_else(|| OpsFlowError::WorkflowNotFound(workflow_id.to_string()))?;

        // Workflow defaults first, per-run options override.
        let mut env = workflow.env.clone();
        env.extend(options.env);

        let run = RunHandle::new(
            workflow.id.clone(),
            env,
            options.triggered_by,
            options.trigger,
            self.events.clone(),
        );
        self.runs.insert(run.id(), run.clone());

        let executor = WorkflowExecutor::with_config(
            self.actions.clone(),
            self.approvals.clone(),
            self.config.clone(),
        );
        Ok(executor.execute_run(&workflow, run).await)
    }

    /// Cancel a run
    ///
    /// Cooperative: flips a `Running`/`WaitingApproval` run to `Cancelled`
    /// and stops further scheduling; in-flight step logic is not interrupted.
    /// Cancelling an already-finished run is a no-op.
    pub fn cancel(&self, run_id: &RunId) -> Result<()> {
        let run = self
            .runs
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OpsFlowError::RunNotFound(run_id.to_string()))?;
        if run.request_cancel() {
            tracing::info!(run = %run_id, "run cancelled");
            let _ = self.events.send(EngineEvent::RunCancelled {
                run_id: *run_id,
                workflow_id: run.workflow_id().clone(),
            });
        }
        Ok(())
    }

    /// Read-only snapshot of one run
    pub fn get_run(&self, run_id: &RunId) -> Option<WorkflowRun> {
        self.runs.get(run_id).map(|entry| entry.value().snapshot())
    }

    /// Read-only snapshots of all runs, optionally filtered by workflow
    ///
    /// Sorted by start time (run ids are ULIDs, so id order matches).
    pub fn list_runs(&self, workflow_id: Option<&WorkflowId>) -> Vec<WorkflowRun> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .iter()
            .filter(|entry| {
                workflow_id
                    .map(|id| entry.value().workflow_id() == id)
                    .unwrap_or(true)
            })
            .map(|entry| entry.value().snapshot())
            .collect();
        runs.sort_by_key(|run| run.id.to_string());
        runs
    }

    /// Evict a run from the run table, returning its final snapshot
    ///
    /// Runs are never expired automatically; this is the only way a run is
    /// destroyed.
    pub fn remove_run(&self, run_id: &RunId) -> Option<WorkflowRun> {
        self.runs
            .remove(run_id)
            .map(|(_, handle)| handle.snapshot())
    }

    /// Clear the workflow and run tables
    pub fn shutdown(&self) {
        self.workflows.clear();
        self.runs.clear();
    }
}
