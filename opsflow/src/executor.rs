//! Workflow execution engine core
//!
//! [`WorkflowExecutor`] owns a single run for its duration: it drives the
//! readiness scheduler over each step list, executes the five step variants
//! with retry/timeout policy, aggregates outputs and logs into the shared
//! run state, and dispatches the success/failure hooks.

use futures_util::future::{join_all, try_join_all, BoxFuture};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::actions::{ActionError, ActionRegistry};
use crate::approvals::{ApprovalError, ApprovalHandler, ApprovalRequest, AUTO_APPROVER};
use crate::context::{ExecutionContext, RunHandle};
use crate::definition::Workflow;
use crate::events::EngineEvent;
use crate::expression;
use crate::run::{LogLevel, WorkflowRun, WorkflowRunStatus};
use crate::scheduler::{self, SchedulerError};
use crate::step::{
    ApprovalConfig, ConditionalConfig, NotificationConfig, ParallelConfig, StepConfig, StepId,
    TaskConfig, WorkflowStep,
};

/// Errors that can occur during workflow execution
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A task referenced an action name nobody registered
    #[error("unknown action '{name}'")]
    UnknownAction {
        /// The unregistered action name
        name: String,
    },
    /// The dependency graph cannot make progress
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// A task's timeout race fired
    #[error("step timed out after {timeout:?}")]
    Timeout {
        /// The configured timeout that was exceeded
        timeout: Duration,
    },
    /// An action ran and failed
    #[error("action '{name}' failed: {source}")]
    ActionFailed {
        /// Action name
        name: String,
        /// The underlying action error
        #[source]
        source: ActionError,
    },
    /// An approval gate was rejected
    #[error("approval rejected by {approver}")]
    ApprovalRejected {
        /// Who rejected
        approver: String,
    },
    /// The approval collaborator failed
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    /// The run was cancelled; no further steps are scheduled
    #[error("run cancelled")]
    Cancelled,
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Tunables for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Base of the linear retry backoff: attempt `n` waits `n × base`
    pub retry_backoff_base: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_backoff_base: Duration::from_millis(1000),
        }
    }
}

/// Drives one workflow run to completion
pub struct WorkflowExecutor {
    actions: Arc<ActionRegistry>,
    approvals: Arc<dyn ApprovalHandler>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create an executor with default configuration
    pub fn new(actions: Arc<ActionRegistry>, approvals: Arc<dyn ApprovalHandler>) -> Self {
        Self::with_config(actions, approvals, ExecutorConfig::default())
    }

    /// Create an executor with explicit configuration
    pub fn with_config(
        actions: Arc<ActionRegistry>,
        approvals: Arc<dyn ApprovalHandler>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            actions,
            approvals,
            config,
        }
    }

    /// Execute a run to its terminal status and return the final snapshot
    ///
    /// The run must be freshly created (`Pending`). Never returns an error:
    /// execution failures end up in the snapshot's status and error fields.
    pub async fn execute_run(&self, workflow: &Workflow, run: Arc<RunHandle>) -> WorkflowRun {
        run.set_status(WorkflowRunStatus::Running);
        run.emit(EngineEvent::RunStarted {
            run_id: run.id(),
            workflow_id: workflow.id.clone(),
        });
        run.log(
            LogLevel::Info,
            None,
            format!("run started for workflow '{}'", workflow.id),
            None,
        );

        match self.execute_step_list(&workflow.steps, &run).await {
            Ok(_) => {
                // Hook failures are logged but never flip a successful run.
                if !workflow.on_success.is_empty() {
                    if let Err(err) = self.execute_step_list(&workflow.on_success, &run).await {
                        run.log(
                            LogLevel::Warning,
                            None,
                            format!("onSuccess hook failed: {err}"),
                            None,
                        );
                    }
                }
                if run.set_status(WorkflowRunStatus::Success) {
                    run.emit(EngineEvent::RunCompleted {
                        run_id: run.id(),
                        workflow_id: workflow.id.clone(),
                    });
                    run.log(LogLevel::Info, None, "run completed", None);
                }
            }
            Err(ExecutorError::Cancelled) => {
                run.log(
                    LogLevel::Info,
                    None,
                    "run cancelled; remaining steps were not scheduled",
                    None,
                );
            }
            Err(err) => {
                let message = err.to_string();
                run.set_error(&message);
                if run.set_status(WorkflowRunStatus::Failed) {
                    run.emit(EngineEvent::RunFailed {
                        run_id: run.id(),
                        workflow_id: workflow.id.clone(),
                        error: message.clone(),
                    });
                    run.log(LogLevel::Error, None, format!("run failed: {message}"), None);
                }
                if !workflow.on_failure.is_empty() {
                    if let Err(hook_err) = self.execute_step_list(&workflow.on_failure, &run).await
                    {
                        run.log(
                            LogLevel::Warning,
                            None,
                            format!("onFailure hook failed: {hook_err}"),
                            None,
                        );
                    }
                }
            }
        }

        run.snapshot()
    }

    /// Schedule one sibling step list in dependency waves
    ///
    /// Returns the ids that executed, in wave order. Boxed because parallel
    /// and conditional steps recurse back into it for their nested lists.
    fn execute_step_list<'a>(
        &'a self,
        steps: &'a [WorkflowStep],
        run: &'a Arc<RunHandle>,
    ) -> BoxFuture<'a, ExecutorResult<Vec<StepId>>> {
        Box::pin(async move {
            let mut executed = Vec::new();
            let mut completed: HashSet<StepId> = HashSet::new();
            let mut pending: Vec<&WorkflowStep> = steps.iter().collect();

            while !pending.is_empty() {
                if run.is_cancelled() {
                    return Err(ExecutorError::Cancelled);
                }

                let wave = scheduler::ready_wave(&pending, &completed);
                if wave.is_empty() {
                    return Err(SchedulerError::CircularDependency {
                        stuck: pending.iter().map(|s| s.id.clone()).collect(),
                    }
                    .into());
                }

                let results = join_all(wave.iter().map(|step| self.execute_step(step, run))).await;

                for step in &wave {
                    completed.insert(step.id.clone());
                    executed.push(step.id.clone());
                }
                pending.retain(|s| !completed.contains(&s.id));

                if run.is_cancelled() {
                    // Results of the in-flight wave were recorded but are
                    // ignored for control flow.
                    return Err(ExecutorError::Cancelled);
                }

                if let Some(err) = results.into_iter().find_map(Result::err) {
                    for step in &pending {
                        run.record_step_skipped(&step.id);
                    }
                    return Err(err);
                }
            }

            Ok(executed)
        })
    }

    /// Execute a single step, applying the `continueOnError` policy
    async fn execute_step(
        &self,
        step: &WorkflowStep,
        run: &Arc<RunHandle>,
    ) -> ExecutorResult<()> {
        run.record_step_running(&step.id);
        run.emit(EngineEvent::StepStarted {
            run_id: run.id(),
            step_id: step.id.clone(),
        });
        tracing::debug!(step = %step.id, kind = step.kind(), "executing step");

        let ctx = ExecutionContext::new(run.clone(), step.id.clone());
        match self.execute_step_config(step, &ctx, run).await {
            Ok(output) => {
                run.record_step_success(&step.id, output);
                run.emit(EngineEvent::StepCompleted {
                    run_id: run.id(),
                    step_id: step.id.clone(),
                });
                Ok(())
            }
            Err(ExecutorError::Cancelled) => {
                run.record_step_skipped(&step.id);
                Err(ExecutorError::Cancelled)
            }
            Err(err) => {
                let message = err.to_string();
                run.record_step_failure(&step.id, &message);
                run.emit(EngineEvent::StepFailed {
                    run_id: run.id(),
                    step_id: step.id.clone(),
                    error: message.clone(),
                });
                if step.continue_on_error {
                    ctx.log_warning(format!(
                        "step failed but continueOnError is set: {message}"
                    ));
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn execute_step_config(
        &self,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
        run: &Arc<RunHandle>,
    ) -> ExecutorResult<Value> {
        match &step.config {
            StepConfig::Task(cfg) => self.execute_task(step, cfg, ctx, run).await,
            StepConfig::Parallel(cfg) => self.execute_parallel(cfg, run).await,
            StepConfig::Conditional(cfg) => self.execute_conditional(cfg, ctx, run).await,
            StepConfig::Approval(cfg) => self.execute_approval(step, cfg, ctx, run).await,
            StepConfig::Notification(cfg) => self.execute_notification(cfg, ctx).await,
        }
    }

    /// Task: resolve params, invoke the action, race the timeout, retry with
    /// linear backoff
    async fn execute_task(
        &self,
        step: &WorkflowStep,
        cfg: &TaskConfig,
        ctx: &ExecutionContext,
        run: &Arc<RunHandle>,
    ) -> ExecutorResult<Value> {
        let action = self
            .actions
            .get(&cfg.action)
            .ok_or_else(|| ExecutorError::UnknownAction {
                name: cfg.action.clone(),
            })?;

        let outputs = ctx.outputs();
        let params = match expression::resolve_params(
            &Value::Object(cfg.params.clone()),
            ctx.env_map(),
            &outputs,
        ) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let total_attempts = step.retries + 1;
        let mut attempt = 1u32;
        loop {
            let invocation = action.execute(params.clone(), ctx.clone());
            let attempt_result = match step.timeout_ms {
                Some(ms) => {
                    let limit = Duration::from_millis(ms);
                    match timeout(limit, invocation).await {
                        Ok(result) => result.map_err(|source| ExecutorError::ActionFailed {
                            name: cfg.action.clone(),
                            source,
                        }),
                        Err(_) => Err(ExecutorError::Timeout { timeout: limit }),
                    }
                }
                None => invocation
                    .await
                    .map_err(|source| ExecutorError::ActionFailed {
                        name: cfg.action.clone(),
                        source,
                    }),
            };

            match attempt_result {
                Ok(output) => {
                    if let Value::Object(produced) = &output {
                        for name in &cfg.outputs {
                            if let Some(value) = produced.get(name) {
                                ctx.set_output(name, value.clone());
                            }
                        }
                    }
                    return Ok(output);
                }
                Err(err) if attempt < total_attempts => {
                    run.bump_step_retry(&step.id);
                    // Deliberately linear, not exponential: n × base before
                    // attempt n + 1.
                    let backoff = self.config.retry_backoff_base * attempt;
                    ctx.log_warning(format!(
                        "attempt {attempt}/{total_attempts} failed: {err}; retrying in {backoff:?}"
                    ));
                    tokio::time::sleep(backoff).await;
                    if run.is_cancelled() {
                        return Err(ExecutorError::Cancelled);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Parallel: execute members in batches of `maxConcurrency`
    async fn execute_parallel(
        &self,
        cfg: &ParallelConfig,
        run: &Arc<RunHandle>,
    ) -> ExecutorResult<Value> {
        let batch_size = cfg
            .max_concurrency
            .filter(|n| *n > 0)
            .unwrap_or_else(|| cfg.steps.len().max(1));

        let mut first_error: Option<ExecutorError> = None;
        for batch in cfg.steps.chunks(batch_size) {
            if run.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
            if cfg.fail_fast {
                let outcome =
                    try_join_all(batch.iter().map(|member| self.execute_step(member, run))).await;
                if let Err(err) = outcome {
                    for member in &cfg.steps {
                        let terminal = run
                            .step_result(&member.id)
                            .map(|r| r.status.is_terminal())
                            .unwrap_or(false);
                        if !terminal {
                            run.record_step_skipped(&member.id);
                        }
                    }
                    return Err(err);
                }
            } else {
                let results =
                    join_all(batch.iter().map(|member| self.execute_step(member, run))).await;
                for result in results {
                    if let Err(err) = result {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        // Member outputs in declaration order.
        let outputs: Vec<Value> = cfg
            .steps
            .iter()
            .map(|member| run.step_output(&member.id).unwrap_or(Value::Null))
            .collect();
        Ok(Value::Array(outputs))
    }

    /// Conditional: evaluate the condition, recurse into the chosen branch
    async fn execute_conditional(
        &self,
        cfg: &ConditionalConfig,
        ctx: &ExecutionContext,
        run: &Arc<RunHandle>,
    ) -> ExecutorResult<Value> {
        let outputs = ctx.outputs();
        let matched = expression::evaluate_condition(&cfg.condition, ctx.env_map(), &outputs);
        ctx.log_info(format!(
            "condition '{}' evaluated to {matched}",
            cfg.condition
        ));

        let branch_steps = if matched { &cfg.if_true } else { &cfg.if_false };
        let branch = match (matched, branch_steps.is_empty()) {
            (true, _) => "ifTrue",
            (false, false) => "ifFalse",
            (false, true) => "none",
        };

        let executed = if branch_steps.is_empty() {
            Vec::new()
        } else {
            self.execute_step_list(branch_steps, run).await?
        };

        Ok(json!({
            "condition": matched,
            "branch": branch,
            "executedSteps": executed,
        }))
    }

    /// Approval: auto-approve on matching environments, otherwise suspend on
    /// the approval collaborator until a decision (or cancellation) arrives
    async fn execute_approval(
        &self,
        step: &WorkflowStep,
        cfg: &ApprovalConfig,
        ctx: &ExecutionContext,
        run: &Arc<RunHandle>,
    ) -> ExecutorResult<Value> {
        if let Some(auto) = &cfg.auto_approve {
            let environment = ctx
                .get_output("environment")
                .map(|v| expression::value_to_string(&v))
                .or_else(|| ctx.env("environment").map(str::to_string));
            if let Some(environment) = environment {
                if auto.environments.iter().any(|e| e == &environment) {
                    ctx.log_info(format!("auto-approved for environment '{environment}'"));
                    return Ok(json!({
                        "approved": true,
                        "approver": AUTO_APPROVER,
                        "environment": environment,
                    }));
                }
            }
        }

        run.set_status(WorkflowRunStatus::WaitingApproval);
        run.emit(EngineEvent::ApprovalRequired {
            run_id: run.id(),
            step_id: step.id.clone(),
            message: cfg.message.clone(),
            approvers: cfg.approvers.clone(),
        });
        ctx.log_info(format!("approval required: {}", cfg.message));

        let request = ApprovalRequest {
            run_id: run.id(),
            workflow_id: run.workflow_id().clone(),
            step_id: step.id.clone(),
            message: cfg.message.clone(),
            approvers: cfg.approvers.clone(),
        };
        let decision = tokio::select! {
            _ = run.cancel_token().cancelled() => return Err(ExecutorError::Cancelled),
            decision = self.approvals.request(request) => decision?,
        };

        run.set_status(WorkflowRunStatus::Running);
        if decision.approved {
            ctx.log_info(format!("approved by {}", decision.approver));
            Ok(serde_json::to_value(&decision).unwrap_or(Value::Null))
        } else {
            Err(ExecutorError::ApprovalRejected {
                approver: decision.approver,
            })
        }
    }

    /// Notification: render the template, delegate to the channel's action
    async fn execute_notification(
        &self,
        cfg: &NotificationConfig,
        ctx: &ExecutionContext,
    ) -> ExecutorResult<Value> {
        let message = expression::resolve_template(&cfg.template, ctx.env_map(), &ctx.outputs());
        let action_name = cfg.channel.action_name();
        let action = self
            .actions
            .get(action_name)
            .ok_or_else(|| ExecutorError::UnknownAction {
                name: action_name.to_string(),
            })?;

        let mut params = Map::new();
        params.insert("target".to_string(), Value::String(cfg.target.clone()));
        params.insert("message".to_string(), Value::String(message));
        action
            .execute(params, ctx.clone())
            .await
            .map_err(|source| ExecutorError::ActionFailed {
                name: action_name.to_string(),
                source,
            })
    }
}
