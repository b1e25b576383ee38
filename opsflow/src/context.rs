//! Shared run state and the per-step execution context
//!
//! A [`RunHandle`] owns everything mutable about one run. Step logic executes
//! concurrently within a wave, so every write to outputs, logs and step
//! results goes through the handle's single mutex; the lock is never held
//! across an await point.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::definition::WorkflowId;
use crate::events::EngineEvent;
use crate::run::{
    LogLevel, RunId, StepResult, StepStatus, WorkflowLog, WorkflowRun, WorkflowRunStatus,
};
use crate::step::StepId;

struct RunInner {
    status: WorkflowRunStatus,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    step_results: HashMap<StepId, StepResult>,
    outputs: HashMap<String, Value>,
    logs: Vec<WorkflowLog>,
    error: Option<String>,
}

/// Live, mutable state of one workflow run
///
/// Owned by the run controller for the duration of the execution and by the
/// engine's run table afterwards; destroyed only by explicit eviction.
pub struct RunHandle {
    id: RunId,
    workflow_id: WorkflowId,
    env: HashMap<String, String>,
    triggered_by: Option<String>,
    trigger: Option<String>,
    started_at: chrono::DateTime<chrono::Utc>,
    state: Mutex<RunInner>,
    cancel: CancellationToken,
    events: broadcast::Sender<EngineEvent>,
}

impl RunHandle {
    /// Create a new run in the `Pending` state
    pub fn new(
        workflow_id: WorkflowId,
        env: HashMap<String, String>,
        triggered_by: Option<String>,
        trigger: Option<String>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: RunId::new(),
            workflow_id,
            env,
            triggered_by,
            trigger,
            started_at: chrono::Utc::now(),
            state: Mutex::new(RunInner {
                status: WorkflowRunStatus::Pending,
                completed_at: None,
                step_results: HashMap::new(),
                outputs: HashMap::new(),
                logs: Vec::new(),
                error: None,
            }),
            cancel: CancellationToken::new(),
            events,
        })
    }

    fn inner(&self) -> MutexGuard<'_, RunInner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run id
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Workflow this run executes
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Merged environment (workflow defaults overridden by run options)
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Current run status
    pub fn status(&self) -> WorkflowRunStatus {
        self.inner().status
    }

    /// Move the run to a new status, enforcing the state machine
    ///
    /// Terminal statuses are sticky; an invalid transition is ignored.
    /// Returns whether the transition happened.
    pub fn set_status(&self, next: WorkflowRunStatus) -> bool {
        let mut inner = self.inner();
        if !transition_allowed(inner.status, next) {
            return false;
        }
        inner.status = next;
        if next.is_terminal() {
            inner.completed_at = Some(chrono::Utc::now());
        }
        true
    }

    /// Cancel the run if it is `Running` or `WaitingApproval`
    ///
    /// Trips the cancellation token so no further waves are scheduled;
    /// in-flight step logic is left to finish on its own. Returns whether
    /// the run actually moved to `Cancelled`.
    pub fn request_cancel(&self) -> bool {
        let cancelled = {
            let mut inner = self.inner();
            match inner.status {
                WorkflowRunStatus::Running | WorkflowRunStatus::WaitingApproval => {
                    inner.status = WorkflowRunStatus::Cancelled;
                    inner.completed_at = Some(chrono::Utc::now());
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            self.cancel.cancel();
        }
        cancelled
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token tripped by [`RunHandle::request_cancel`]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Record the first unrecovered error; later calls are ignored
    pub fn set_error(&self, message: impl Into<String>) {
        let mut inner = self.inner();
        if inner.error.is_none() {
            inner.error = Some(message.into());
        }
    }

    /// Append a log line and mirror it through tracing and the event channel
    pub fn log(
        &self,
        level: LogLevel,
        step_id: Option<StepId>,
        message: impl Into<String>,
        payload: Option<Value>,
    ) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(run_id = %self.id, step = ?step_id, "{message}"),
            LogLevel::Warning => tracing::warn!(run_id = %self.id, step = ?step_id, "{message}"),
            LogLevel::Error => tracing::error!(run_id = %self.id, step = ?step_id, "{message}"),
        }
        let entry = WorkflowLog {
            timestamp: chrono::Utc::now(),
            level,
            step_id,
            message,
            payload,
        };
        self.inner().logs.push(entry.clone());
        self.emit(EngineEvent::Log {
            run_id: self.id,
            entry,
        });
    }

    /// Write an output under both its scoped and bare key
    ///
    /// `stepId.key` never collides across steps; the bare `key` form is
    /// last-writer-wins by design.
    pub fn set_output(&self, step_id: &StepId, key: &str, value: Value) {
        let mut inner = self.inner();
        inner
            .outputs
            .insert(format!("{}.{}", step_id, key), value.clone());
        inner.outputs.insert(key.to_string(), value);
    }

    /// Snapshot of the accumulated outputs map
    pub fn outputs(&self) -> HashMap<String, Value> {
        self.inner().outputs.clone()
    }

    /// Read a single output by key
    pub fn output(&self, key: &str) -> Option<Value> {
        self.inner().outputs.get(key).cloned()
    }

    /// Create the `Running` step record for a step that is starting
    pub fn record_step_running(&self, step_id: &StepId) {
        self.inner()
            .step_results
            .insert(step_id.clone(), StepResult::running(step_id.clone()));
    }

    /// Mark a running step successful with its produced output
    pub fn record_step_success(&self, step_id: &StepId, output: Value) {
        let mut inner = self.inner();
        if let Some(result) = inner.step_results.get_mut(step_id) {
            if result.status.is_terminal() {
                return;
            }
            result.status = StepStatus::Success;
            result.completed_at = Some(chrono::Utc::now());
            result.output = output;
        }
    }

    /// Mark a running step failed with its last error
    pub fn record_step_failure(&self, step_id: &StepId, error: impl Into<String>) {
        let mut inner = self.inner();
        if let Some(result) = inner.step_results.get_mut(step_id) {
            if result.status.is_terminal() {
                return;
            }
            result.status = StepStatus::Failed;
            result.completed_at = Some(chrono::Utc::now());
            result.error = Some(error.into());
        }
    }

    /// Mark a step skipped; creates the record if the step never started
    pub fn record_step_skipped(&self, step_id: &StepId) {
        let mut inner = self.inner();
        match inner.step_results.get_mut(step_id) {
            Some(result) => {
                if result.status.is_terminal() {
                    return;
                }
                result.status = StepStatus::Skipped;
                result.completed_at = Some(chrono::Utc::now());
            }
            None => {
                inner
                    .step_results
                    .insert(step_id.clone(), StepResult::skipped(step_id.clone()));
            }
        }
    }

    /// Count one retry attempt against a step's record
    pub fn bump_step_retry(&self, step_id: &StepId) {
        if let Some(result) = self.inner().step_results.get_mut(step_id) {
            result.retry_count += 1;
        }
    }

    /// Read a step's recorded output, if it has one
    pub fn step_output(&self, step_id: &StepId) -> Option<Value> {
        self.inner()
            .step_results
            .get(step_id)
            .map(|r| r.output.clone())
    }

    /// Read a step's execution record
    pub fn step_result(&self, step_id: &StepId) -> Option<StepResult> {
        self.inner().step_results.get(step_id).cloned()
    }

    /// Send an event to subscribers; dropped when nobody listens
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Produce an owned snapshot of the run
    pub fn snapshot(&self) -> WorkflowRun {
        let inner = self.inner();
        WorkflowRun {
            id: self.id,
            workflow_id: self.workflow_id.clone(),
            status: inner.status,
            triggered_by: self.triggered_by.clone(),
            trigger: self.trigger.clone(),
            started_at: self.started_at,
            completed_at: inner.completed_at,
            step_results: inner.step_results.clone(),
            outputs: inner.outputs.clone(),
            logs: inner.logs.clone(),
            error: inner.error.clone(),
        }
    }
}

fn transition_allowed(from: WorkflowRunStatus, to: WorkflowRunStatus) -> bool {
    use WorkflowRunStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Running, WaitingApproval)
            | (Running, Success)
            | (Running, Failed)
            | (Running, Cancelled)
            | (WaitingApproval, Running)
            | (WaitingApproval, Failed)
            | (WaitingApproval, Cancelled)
    )
}

/// Ephemeral per-step view handed to action handlers and resolvers
///
/// Cheap to clone; recreated for every step invocation, never persisted.
#[derive(Clone)]
pub struct ExecutionContext {
    run: Arc<RunHandle>,
    step_id: StepId,
}

impl ExecutionContext {
    /// Create a context scoped to one step of a run
    pub fn new(run: Arc<RunHandle>, step_id: StepId) -> Self {
        Self { run, step_id }
    }

    /// The step this context is scoped to
    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    /// The run id
    pub fn run_id(&self) -> RunId {
        self.run.id()
    }

    /// Read one merged environment variable
    pub fn env(&self, name: &str) -> Option<&str> {
        self.run.env().get(name).map(String::as_str)
    }

    /// The full merged environment map
    pub fn env_map(&self) -> &HashMap<String, String> {
        self.run.env()
    }

    /// Snapshot of the run's outputs map
    pub fn outputs(&self) -> HashMap<String, Value> {
        self.run.outputs()
    }

    /// Read a single output by key
    pub fn get_output(&self, key: &str) -> Option<Value> {
        self.run.output(key)
    }

    /// Write an output under this step's scope (and the bare key form)
    pub fn set_output(&self, key: &str, value: Value) {
        self.run.set_output(&self.step_id, key, value);
    }

    /// Append an info-level log line attributed to this step
    pub fn log_info(&self, message: impl Into<String>) {
        self.run
            .log(LogLevel::Info, Some(self.step_id.clone()), message, None);
    }

    /// Append a warning-level log line attributed to this step
    pub fn log_warning(&self, message: impl Into<String>) {
        self.run
            .log(LogLevel::Warning, Some(self.step_id.clone()), message, None);
    }

    /// Append an error-level log line attributed to this step
    pub fn log_error(&self, message: impl Into<String>) {
        self.run
            .log(LogLevel::Error, Some(self.step_id.clone()), message, None);
    }

    /// Append a log line with a structured payload
    pub fn log_with_payload(&self, level: LogLevel, message: impl Into<String>, payload: Value) {
        self.run
            .log(level, Some(self.step_id.clone()), message, Some(payload));
    }
}
