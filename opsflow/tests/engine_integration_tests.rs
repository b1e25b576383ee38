//! End-to-end tests driving the engine façade the way an embedding
//! application would: register workflows and actions, execute runs, observe
//! events, cancel, approve.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use opsflow::{
    ActionError, ApprovalBroker, ApprovalDecision, AutoApprover, EngineEvent, ExecutorConfig,
    RunOptions, StepId, StepStatus, Workflow, WorkflowEngine, WorkflowId, WorkflowRunStatus,
    WorkflowStep,
};

fn fast_engine(approvals: Arc<dyn opsflow::ApprovalHandler>) -> WorkflowEngine {
    WorkflowEngine::with_config(
        approvals,
        ExecutorConfig {
            retry_backoff_base: Duration::from_millis(1),
        },
    )
}

fn auto_engine() -> WorkflowEngine {
    fast_engine(Arc::new(AutoApprover::new()))
}

#[tokio::test]
async fn every_step_of_an_acyclic_graph_reaches_a_terminal_status_once() {
    let engine = auto_engine();
    let starts = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = starts.clone();
    engine.actions().register_fn("track", move |_params, ctx| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(ctx.step_id().to_string());
            Ok(Value::Null)
        }
    });

    let workflow = Workflow::new("graph", "graph")
        .with_step(WorkflowStep::task("a", "track"))
        .with_step(WorkflowStep::task("b", "track").with_depends_on(["a"]))
        .with_step(WorkflowStep::task("c", "track").with_depends_on(["a"]))
        .with_step(WorkflowStep::task("d", "track").with_depends_on(["b", "c"]))
        .with_step(WorkflowStep::task("e", "track"));
    engine.register_workflow(workflow).unwrap();

    let run = engine
        .execute(&WorkflowId::new("graph"), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(run.status, WorkflowRunStatus::Success);
    assert_eq!(run.step_results.len(), 5);
    for result in run.step_results.values() {
        assert!(result.status.is_terminal(), "{:?} not terminal", result);
    }
    // Each step started exactly once.
    let started = starts.lock().unwrap();
    let unique: HashSet<&String> = started.iter().collect();
    assert_eq!(started.len(), 5);
    assert_eq!(unique.len(), 5);
}

#[tokio::test]
async fn dependent_step_never_starts_before_its_dependencies_finish() {
    let engine = auto_engine();
    let finished = Arc::new(Mutex::new(HashSet::<String>::new()));
    let violations = Arc::new(AtomicU32::new(0));

    let finished_c = finished.clone();
    engine.actions().register_fn("slow-dep", move |_params, ctx| {
        let finished = finished_c.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            finished.lock().unwrap().insert(ctx.step_id().to_string());
            Ok(Value::Null)
        }
    });
    let (finished_c, violations_c) = (finished.clone(), violations.clone());
    engine.actions().register_fn("checker", move |_params, _ctx| {
        let finished = finished_c.clone();
        let violations = violations_c.clone();
        async move {
            let done = finished.lock().unwrap();
            if !done.contains("a") || !done.contains("b") {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Value::Null)
        }
    });

    let workflow = Workflow::new("deps", "deps")
        .with_step(WorkflowStep::task("a", "slow-dep"))
        .with_step(WorkflowStep::task("b", "slow-dep"))
        .with_step(WorkflowStep::task("c", "checker").with_depends_on(["a", "b"]));
    engine.register_workflow(workflow).unwrap();

    let run = engine
        .execute(&WorkflowId::new("deps"), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.status, WorkflowRunStatus::Success);
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fully_cyclic_step_list_fails_with_zero_steps_executed() {
    // Registration rejects cycles, so drive the executor directly the way
    // the run controller does.
    use opsflow::{ActionRegistry, WorkflowExecutor};
    let workflow = Workflow::new("cyclic", "cyclic")
        .with_step(WorkflowStep::task("a", "core.log").with_depends_on(["b"]))
        .with_step(WorkflowStep::task("b", "core.log").with_depends_on(["a"]));

    let executor = WorkflowExecutor::new(
        Arc::new(ActionRegistry::with_builtins()),
        Arc::new(AutoApprover::new()),
    );
    let (events, _) = tokio::sync::broadcast::channel(16);
    let run = opsflow::RunHandle::new(
        workflow.id.clone(),
        Default::default(),
        None,
        None,
        events,
    );
    let snapshot = executor.execute_run(&workflow, run).await;

    assert_eq!(snapshot.status, WorkflowRunStatus::Failed);
    assert!(snapshot
        .error
        .as_deref()
        .unwrap()
        .contains("circular dependency"));
    // Nothing ever started.
    assert!(snapshot.step_results.is_empty());
    assert!(snapshot.outputs.is_empty());
}

#[tokio::test]
async fn retries_exhaust_before_the_error_propagates() {
    let engine = auto_engine();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    engine.actions().register_fn("always-fails", move |_params, _ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ActionError::ExecutionFailed("connection refused".to_string()))
        }
    });

    let workflow = Workflow::new("retry", "retry")
        .with_step(WorkflowStep::task("push", "always-fails").with_retries(2));
    engine.register_workflow(workflow).unwrap();

    let run = engine
        .execute(&WorkflowId::new("retry"), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(run.status, WorkflowRunStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let result = &run.step_results[&StepId::new("push")];
    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(result.retry_count, 2);
    assert!(result.error.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn expression_resolution_against_merged_env() {
    let engine = auto_engine();
    let workflow = Workflow::new("expr", "expr")
        .with_env("FOO", "from-workflow")
        .with_step(
            WorkflowStep::task("emit", "core.set_output")
                .with_param("name", "resolved")
                .with_param("value", "${{ env.FOO }}|${{ env.NOT_SET }}|${{ outputs.nothing }}"),
        );
    engine.register_workflow(workflow).unwrap();

    let run = engine
        .execute(
            &WorkflowId::new("expr"),
            RunOptions::default().with_env("FOO", "from-options"),
        )
        .await
        .unwrap();

    // Options override the workflow default; unresolvable placeholders
    // become empty strings instead of failing the step.
    assert_eq!(run.outputs["resolved"], json!("from-options||"));
    assert_eq!(run.status, WorkflowRunStatus::Success);
}

#[tokio::test]
async fn cancelling_a_waiting_approval_run_ignores_a_late_decision() {
    let broker = Arc::new(ApprovalBroker::new());
    let engine = Arc::new(fast_engine(broker.clone()));
    engine.actions().register_fn("after-gate", |_params, _ctx| async {
        Ok(Value::Null)
    });

    let workflow = Workflow::new("gated", "gated")
        .with_step(WorkflowStep::approval("gate", "ship it?"))
        .with_step(WorkflowStep::task("ship", "after-gate").with_depends_on(["gate"]));
    engine.register_workflow(workflow).unwrap();

    let mut events = engine.subscribe();
    let executing = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute(&WorkflowId::new("gated"), RunOptions::default())
                .await
        })
    };

    // Wait for the approval gate to open.
    let run_id = loop {
        match events.recv().await.unwrap() {
            EngineEvent::ApprovalRequired { run_id, .. } => break run_id,
            _ => continue,
        }
    };
    assert_eq!(
        engine.get_run(&run_id).unwrap().status,
        WorkflowRunStatus::WaitingApproval
    );

    engine.cancel(&run_id).unwrap();
    let run = executing.await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowRunStatus::Cancelled);

    // The simulated approval resolves late; the run stays cancelled and the
    // dependent step is never scheduled.
    let late = broker.submit(run_id, &StepId::new("gate"), ApprovalDecision::approved("alice"));
    assert!(late.is_err());
    let after = engine.get_run(&run_id).unwrap();
    assert_eq!(after.status, WorkflowRunStatus::Cancelled);
    assert!(!after.step_results.contains_key(&StepId::new("ship")));
}

#[tokio::test]
async fn broker_approval_resumes_a_waiting_run() {
    let broker = Arc::new(ApprovalBroker::new());
    let engine = Arc::new(fast_engine(broker.clone()));

    let workflow = Workflow::new("gated", "gated")
        .with_step(WorkflowStep::approval("gate", "ship it?"))
        .with_step(
            WorkflowStep::task("ship", "core.set_output")
                .with_param("name", "shipped")
                .with_param("value", true)
                .with_depends_on(["gate"]),
        );
    engine.register_workflow(workflow).unwrap();

    let mut events = engine.subscribe();
    let executing = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute(&WorkflowId::new("gated"), RunOptions::default())
                .await
        })
    };

    let run_id = loop {
        match events.recv().await.unwrap() {
            EngineEvent::ApprovalRequired { run_id, .. } => break run_id,
            _ => continue,
        }
    };
    // The event fires just before the request parks itself on the broker.
    while broker.pending().is_empty() {
        tokio::task::yield_now().await;
    }
    broker
        .submit(
            run_id,
            &StepId::new("gate"),
            ApprovalDecision::approved("release-manager"),
        )
        .unwrap();

    let run = executing.await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowRunStatus::Success);
    assert_eq!(run.outputs["shipped"], json!(true));
    let gate = &run.step_results[&StepId::new("gate")];
    assert_eq!(gate.output["approver"], json!("release-manager"));
}

#[tokio::test]
async fn parallel_fail_fast_and_collecting_modes_differ() {
    let engine = auto_engine();
    engine.actions().register_fn("boom", |_params, _ctx| async {
        Err(ActionError::ExecutionFailed("boom".to_string()))
    });
    engine.actions().register_fn("steady", |_params, _ctx| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!("steady-output"))
    });

    let make_workflow = |id: &str, fail_fast: bool| {
        let mut parallel = WorkflowStep::parallel(
            "fan-out",
            vec![
                WorkflowStep::task("breaks", "boom"),
                WorkflowStep::task("works", "steady"),
            ],
        );
        if let opsflow::StepConfig::Parallel(cfg) = &mut parallel.config {
            cfg.fail_fast = fail_fast;
        }
        Workflow::new(id, id).with_step(parallel)
    };

    engine.register_workflow(make_workflow("ff", true)).unwrap();
    engine.register_workflow(make_workflow("collect", false)).unwrap();

    let run = engine
        .execute(&WorkflowId::new("ff"), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.status, WorkflowRunStatus::Failed);
    assert_eq!(run.step_results[&StepId::new("works")].status, StepStatus::Skipped);

    let run = engine
        .execute(&WorkflowId::new("collect"), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.status, WorkflowRunStatus::Failed);
    let works = &run.step_results[&StepId::new("works")];
    assert_eq!(works.status, StepStatus::Success);
    assert_eq!(works.output, json!("steady-output"));
}

#[tokio::test]
async fn conditional_executes_exactly_the_true_branch() {
    let engine = auto_engine();
    let workflow = Workflow::new("cond", "cond")
        .with_step(
            WorkflowStep::task("count", "core.set_output")
                .with_param("name", "count")
                .with_param("value", 10),
        )
        .with_step(WorkflowStep::conditional(
            "check",
            "outputs.count > 5",
            vec![
                WorkflowStep::task("scale-up", "core.set_output")
                    .with_param("name", "scaled")
                    .with_param("value", "up"),
            ],
        ).with_depends_on(["count"]));
    engine.register_workflow(workflow).unwrap();

    let run = engine
        .execute(&WorkflowId::new("cond"), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.status, WorkflowRunStatus::Success);
    assert_eq!(run.outputs["scaled"], json!("up"));
    let check = &run.step_results[&StepId::new("check")];
    assert_eq!(check.output["branch"], json!("ifTrue"));
    assert_eq!(check.output["executedSteps"], json!(["scale-up"]));
}

#[tokio::test]
async fn registering_twice_replaces_and_new_runs_use_the_new_definition() {
    let engine = auto_engine();
    let versioned = |value: &str| {
        Workflow::new("replace-me", "Replace me").with_step(
            WorkflowStep::task("emit", "core.set_output")
                .with_param("name", "version")
                .with_param("value", value),
        )
    };

    engine.register_workflow(versioned("first")).unwrap();
    let run = engine
        .execute(&WorkflowId::new("replace-me"), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.outputs["version"], json!("first"));

    engine.register_workflow(versioned("second")).unwrap();
    let run = engine
        .execute(&WorkflowId::new("replace-me"), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.outputs["version"], json!("second"));
}

#[tokio::test]
async fn yaml_pipeline_runs_end_to_end() {
    let engine = auto_engine();
    let workflow = opsflow::workflow_from_yaml(
        r##"
id: hello
name: Hello pipeline
env:
  WHO: world
steps:
  - id: greet
    type: task
    action: core.set_output
    params:
      name: greeting
      value: "hello ${{ env.WHO }}"
  - id: gate
    type: conditional
    dependsOn: [greet]
    condition: "env.WHO == world"
    ifTrue:
      - id: announce
        type: notification
        channel: slack
        target: "#general"
        template: "{{ outputs.greeting }}"
"##,
    )
    .unwrap();
    engine.register_workflow(workflow).unwrap();

    let run = engine
        .execute(&WorkflowId::new("hello"), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.status, WorkflowRunStatus::Success);
    assert_eq!(run.outputs["greeting"], json!("hello world"));
    let announce = &run.step_results[&StepId::new("announce")];
    assert_eq!(announce.output["message"], json!("hello world"));
}

#[tokio::test]
async fn action_registries_are_isolated_per_engine() {
    let one = auto_engine();
    let two = auto_engine();
    one.actions()
        .register_fn("custom.only-one", |_p, _c| async { Ok(Value::Null) });
    assert!(one.actions().contains("custom.only-one"));
    assert!(!two.actions().contains("custom.only-one"));
}
