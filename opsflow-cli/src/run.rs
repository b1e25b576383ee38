//! Run command implementation for executing workflows

use anyhow::Context;
use async_trait::async_trait;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use opsflow::{
    ApprovalDecision, ApprovalError, ApprovalHandler, ApprovalRequest, AutoApprover, EngineEvent,
    OpsFlowError, RunOptions, WorkflowEngine, WorkflowRun, WorkflowRunStatus,
};

use crate::exit_codes::{EXIT_ERROR, EXIT_SUCCESS, EXIT_VALIDATION};

/// Execute a workflow file and report the outcome
pub async fn run_workflow_command(
    file: &Path,
    env: Vec<String>,
    auto_approve: bool,
    triggered_by: Option<String>,
) -> anyhow::Result<i32> {
    let workflow = match opsflow::workflow_from_yaml_file(file) {
        Ok(workflow) => workflow,
        Err(err @ (OpsFlowError::InvalidWorkflow { .. } | OpsFlowError::Yaml(_))) => {
            eprintln!("{} {err}", "invalid workflow:".red());
            return Ok(EXIT_VALIDATION);
        }
        Err(err) => return Err(err.into()),
    };

    let mut options = RunOptions::default();
    for pair in env {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid --env '{pair}': use KEY=VALUE"))?;
        options.env.insert(key.to_string(), value.to_string());
    }
    if let Some(actor) = triggered_by {
        options = options.with_triggered_by(actor);
    }
    options = options.with_trigger("manual");

    let approvals: Arc<dyn ApprovalHandler> = if auto_approve {
        Arc::new(AutoApprover::new())
    } else {
        Arc::new(CliApprover)
    };
    let engine = WorkflowEngine::new(approvals);
    let workflow_id = workflow.id.clone();
    println!("{} {} ({})", "running".bold(), workflow.name, workflow_id);
    engine.register_workflow(workflow)?;

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let run = engine.execute(&workflow_id, options).await?;
    printer.abort();
    print_summary(&run);

    Ok(if run.status == WorkflowRunStatus::Success {
        EXIT_SUCCESS
    } else {
        EXIT_ERROR
    })
}

/// Interactive approval handler prompting on the terminal
struct CliApprover;

#[async_trait]
impl ApprovalHandler for CliApprover {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalDecision, ApprovalError> {
        let prompt = if request.approvers.is_empty() {
            request.message.clone()
        } else {
            format!(
                "{} (approvers: {})",
                request.message,
                request.approvers.join(", ")
            )
        };
        let confirmed = tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
        })
        .await
        .map_err(|e| ApprovalError::Handler(e.to_string()))?
        .map_err(|e| ApprovalError::Handler(e.to_string()))?;

        let approver = std::env::var("USER").unwrap_or_else(|_| "cli".to_string());
        Ok(if confirmed {
            ApprovalDecision::approved(approver)
        } else {
            ApprovalDecision::rejected(approver)
        })
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::StepStarted { step_id, .. } => {
            println!("  {} {step_id}", "→".dimmed());
        }
        EngineEvent::StepCompleted { step_id, .. } => {
            println!("  {} {step_id}", "✓".green());
        }
        EngineEvent::StepFailed { step_id, error, .. } => {
            println!("  {} {step_id}: {}", "✗".red(), error.red());
        }
        EngineEvent::ApprovalRequired { message, .. } => {
            println!("  {} approval required: {message}", "⏸".yellow());
        }
        _ => {}
    }
}

fn print_summary(run: &WorkflowRun) {
    let status = match run.status {
        WorkflowRunStatus::Success => "success".green(),
        WorkflowRunStatus::Failed => "failed".red(),
        WorkflowRunStatus::Cancelled => "cancelled".yellow(),
        other => format!("{other:?}").normal(),
    };
    println!();
    println!("run {} finished: {status}", run.id);
    if let Some(error) = &run.error {
        println!("  error: {}", error.red());
    }

    let mut results: Vec<_> = run.step_results.values().collect();
    results.sort_by_key(|r| r.started_at);
    for result in results {
        println!("  {:<12} {}", format!("{:?}", result.status).to_lowercase(), result.step_id);
    }

    if !run.outputs.is_empty() {
        println!("  outputs:");
        let mut keys: Vec<_> = run.outputs.keys().collect();
        keys.sort();
        for key in keys {
            // The scoped form is enough; bare keys repeat it.
            if key.contains('.') {
                println!("    {key} = {}", run.outputs[key]);
            }
        }
    }
}
