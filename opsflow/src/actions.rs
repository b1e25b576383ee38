//! Pluggable action system for task steps
//!
//! An [`Action`] is a named, registerable unit of work invoked by task steps
//! (and, indirectly, by notification steps). The engine is agnostic to what
//! an action does; cloud and SaaS adapters plug in here by overwriting the
//! built-in registrations.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::context::ExecutionContext;
use crate::run::LogLevel;

/// Registry name of the log action
pub const ACTION_LOG: &str = "core.log";
/// Registry name of the wait action
pub const ACTION_WAIT: &str = "core.wait";
/// Registry name of the set-output action
pub const ACTION_SET_OUTPUT: &str = "core.set_output";
/// Registry name of the shell action
pub const ACTION_SHELL: &str = "shell.run";
/// Registry name of the Slack notification action
pub const ACTION_NOTIFY_SLACK: &str = "notify.slack";
/// Registry name of the email notification action
pub const ACTION_NOTIFY_EMAIL: &str = "notify.email";
/// Registry name of the HTTP request action
pub const ACTION_HTTP_REQUEST: &str = "http.request";

/// Errors that can occur during action execution
#[derive(Debug, Error)]
pub enum ActionError {
    /// A required parameter is absent
    #[error("missing required parameter '{name}'")]
    MissingParam {
        /// Parameter name
        name: String,
    },
    /// A parameter has the wrong shape
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParam {
        /// Parameter name
        name: String,
        /// What was wrong with it
        reason: String,
    },
    /// The action ran and failed
    #[error("{0}")]
    ExecutionFailed(String),
    /// IO error during action execution
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON handling error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for action operations
pub type ActionResult<T> = Result<T, ActionError>;

/// A named, pluggable unit of work invoked by task steps
///
/// Parameters arrive already resolved (placeholders substituted). Handlers
/// may wrap their own resilience policies internally; the step-level
/// retry/timeout wraps whatever the handler does.
#[async_trait]
pub trait Action: Send + Sync {
    /// Execute the action
    async fn execute(&self, params: Map<String, Value>, ctx: ExecutionContext)
        -> ActionResult<Value>;

    /// Human-readable description of what this action does
    fn description(&self) -> String;
}

/// Maps action names to handlers; shared across runs
///
/// Registration is idempotent: re-registering a name overwrites the previous
/// handler, which is also how real notification adapters replace the built-in
/// stand-ins.
pub struct ActionRegistry {
    actions: DashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            actions: DashMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in actions
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(ACTION_LOG, Arc::new(LogMessageAction));
        registry.register(ACTION_WAIT, Arc::new(WaitAction));
        registry.register(ACTION_SET_OUTPUT, Arc::new(SetOutputAction));
        registry.register(ACTION_SHELL, Arc::new(ShellAction));
        registry.register(ACTION_NOTIFY_SLACK, Arc::new(NotifyAction::slack()));
        registry.register(ACTION_NOTIFY_EMAIL, Arc::new(NotifyAction::email()));
        registry.register(ACTION_HTTP_REQUEST, Arc::new(HttpRequestAction));
        registry
    }

    /// Register (or replace) an action under a name
    pub fn register(&self, name: impl Into<String>, action: Arc<dyn Action>) {
        self.actions.insert(name.into(), action);
    }

    /// Register a closure as an action
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Map<String, Value>, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<Value>> + Send + 'static,
    {
        let name = name.into();
        let description = format!("custom action '{name}'");
        self.register(
            name,
            Arc::new(FnAction {
                description,
                handler: Box::new(move |params, ctx| -> BoxFuture<'static, ActionResult<Value>> {
                    Box::pin(handler(params, ctx))
                }),
            }),
        );
    }

    /// Look up an action by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).map(|entry| entry.value().clone())
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// All registered action names
    pub fn names(&self) -> Vec<String> {
        self.actions.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

type FnHandler = Box<
    dyn Fn(Map<String, Value>, ExecutionContext) -> BoxFuture<'static, ActionResult<Value>>
        + Send
        + Sync,
>;

struct FnAction {
    description: String,
    handler: FnHandler,
}

#[async_trait]
impl Action for FnAction {
    async fn execute(
        &self,
        params: Map<String, Value>,
        ctx: ExecutionContext,
    ) -> ActionResult<Value> {
        (self.handler)(params, ctx).await
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

fn require_str(params: &Map<String, Value>, name: &str) -> ActionResult<String> {
    match params.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ActionError::InvalidParam {
            name: name.to_string(),
            reason: format!("expected a string, got {other}"),
        }),
        None => Err(ActionError::MissingParam {
            name: name.to_string(),
        }),
    }
}

/// Action that appends a message to the run log (`core.log`)
///
/// Params: `message` (string, required), `level` (one of `info`, `warning`,
/// `error`; defaults to `info`).
pub struct LogMessageAction;

#[async_trait]
impl Action for LogMessageAction {
    async fn execute(
        &self,
        params: Map<String, Value>,
        ctx: ExecutionContext,
    ) -> ActionResult<Value> {
        let message = require_str(&params, "message")?;
        let level = match params.get("level").and_then(Value::as_str) {
            None | Some("info") => LogLevel::Info,
            Some("warning") => LogLevel::Warning,
            Some("error") => LogLevel::Error,
            Some(other) => {
                return Err(ActionError::InvalidParam {
                    name: "level".to_string(),
                    reason: format!("unknown level '{other}'"),
                })
            }
        };
        match level {
            LogLevel::Info => ctx.log_info(&message),
            LogLevel::Warning => ctx.log_warning(&message),
            LogLevel::Error => ctx.log_error(&message),
        }
        Ok(Value::String(message))
    }

    fn description(&self) -> String {
        "Append a message to the run log".to_string()
    }
}

/// Action that pauses execution for a duration (`core.wait`)
///
/// Params: `durationMs` (non-negative integer, required).
pub struct WaitAction;

#[async_trait]
impl Action for WaitAction {
    async fn execute(
        &self,
        params: Map<String, Value>,
        _ctx: ExecutionContext,
    ) -> ActionResult<Value> {
        let millis = params
            .get("durationMs")
            .and_then(Value::as_u64)
            .ok_or_else(|| ActionError::MissingParam {
                name: "durationMs".to_string(),
            })?;
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(Value::Null)
    }

    fn description(&self) -> String {
        "Pause execution for a duration".to_string()
    }
}

/// Action that writes a value into the run outputs (`core.set_output`)
///
/// Params: `name` (string, required), `value` (any, required).
pub struct SetOutputAction;

#[async_trait]
impl Action for SetOutputAction {
    async fn execute(
        &self,
        params: Map<String, Value>,
        ctx: ExecutionContext,
    ) -> ActionResult<Value> {
        let name = require_str(&params, "name")?;
        let value = params
            .get("value")
            .cloned()
            .ok_or_else(|| ActionError::MissingParam {
                name: "value".to_string(),
            })?;
        ctx.set_output(&name, value.clone());
        Ok(value)
    }

    fn description(&self) -> String {
        "Write a value into the run outputs".to_string()
    }
}

/// Action that runs a command in a subprocess (`shell.run`)
///
/// Params: `command` (string, required), `args` (array of strings; when
/// absent, `command` is run through `sh -c`), `cwd` (string), `env` (object
/// of string values, added on top of the process environment).
///
/// Returns `{stdout, stderr, exitCode}`; a non-zero exit is an error. The
/// child is killed on drop so a step timeout does not leak the process.
pub struct ShellAction;

#[async_trait]
impl Action for ShellAction {
    async fn execute(
        &self,
        params: Map<String, Value>,
        ctx: ExecutionContext,
    ) -> ActionResult<Value> {
        let command_str = require_str(&params, "command")?;

        let mut command = match params.get("args") {
            Some(Value::Array(args)) => {
                let mut cmd = Command::new(&command_str);
                for arg in args {
                    match arg {
                        Value::String(s) => {
                            cmd.arg(s);
                        }
                        other => {
                            return Err(ActionError::InvalidParam {
                                name: "args".to_string(),
                                reason: format!("expected string elements, got {other}"),
                            })
                        }
                    }
                }
                cmd
            }
            Some(other) => {
                return Err(ActionError::InvalidParam {
                    name: "args".to_string(),
                    reason: format!("expected an array, got {other}"),
                })
            }
            None => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(&command_str);
                cmd
            }
        };

        if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
            command.current_dir(cwd);
        }
        if let Some(Value::Object(env)) = params.get("env") {
            for (key, value) in env {
                match value {
                    Value::String(s) => {
                        command.env(key, s);
                    }
                    other => {
                        return Err(ActionError::InvalidParam {
                            name: "env".to_string(),
                            reason: format!("expected string values, got {other}"),
                        })
                    }
                }
            }
        }
        command.kill_on_drop(true);

        ctx.log_info(format!("running command: {command_str}"));
        let output = command.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(ActionError::ExecutionFailed(format!(
                "command exited with code {exit_code}: {}",
                stderr.trim()
            )));
        }

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exitCode": exit_code,
        }))
    }

    fn description(&self) -> String {
        "Run a command in a subprocess".to_string()
    }
}

/// Built-in stand-in for notification delivery (`notify.slack`,
/// `notify.email`)
///
/// Logs the resolved message and echoes the payload. Deployments register
/// their real Slack/email adapters over these names.
pub struct NotifyAction {
    channel: &'static str,
}

impl NotifyAction {
    /// Stand-in for Slack delivery
    pub fn slack() -> Self {
        Self { channel: "slack" }
    }

    /// Stand-in for email delivery
    pub fn email() -> Self {
        Self { channel: "email" }
    }
}

#[async_trait]
impl Action for NotifyAction {
    async fn execute(
        &self,
        params: Map<String, Value>,
        ctx: ExecutionContext,
    ) -> ActionResult<Value> {
        let target = require_str(&params, "target")?;
        let message = require_str(&params, "message")?;
        let payload = json!({
            "channel": self.channel,
            "target": target,
            "message": message,
        });
        ctx.log_with_payload(
            LogLevel::Info,
            format!("{} notification to {target}", self.channel),
            payload.clone(),
        );
        Ok(payload)
    }

    fn description(&self) -> String {
        format!("Deliver a {} notification", self.channel)
    }
}

/// Built-in stand-in for webhook delivery (`http.request`)
///
/// Logs the request it would make and echoes the payload; a real HTTP
/// adapter replaces this registration in deployments.
pub struct HttpRequestAction;

#[async_trait]
impl Action for HttpRequestAction {
    async fn execute(
        &self,
        params: Map<String, Value>,
        ctx: ExecutionContext,
    ) -> ActionResult<Value> {
        let url = require_str(&params, "target")
            .or_else(|_| require_str(&params, "url"))?;
        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("POST")
            .to_uppercase();
        let body = params.get("message").or_else(|| params.get("body")).cloned();
        let payload = json!({
            "url": url,
            "method": method,
            "body": body,
        });
        ctx.log_with_payload(
            LogLevel::Info,
            format!("{method} {url}"),
            payload.clone(),
        );
        Ok(payload)
    }

    fn description(&self) -> String {
        "Issue an HTTP request".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunHandle;
    use crate::definition::WorkflowId;
    use crate::step::StepId;
    use std::collections::HashMap;
    use tokio::sync::broadcast;

    fn test_ctx() -> ExecutionContext {
        let (events, _) = broadcast::channel(16);
        let run = RunHandle::new(WorkflowId::new("wf"), HashMap::new(), None, None, events);
        ExecutionContext::new(run, StepId::new("step"))
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().expect("params must be an object").clone()
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = ActionRegistry::with_builtins();
        for name in [
            ACTION_LOG,
            ACTION_WAIT,
            ACTION_SET_OUTPUT,
            ACTION_SHELL,
            ACTION_NOTIFY_SLACK,
            ACTION_NOTIFY_EMAIL,
            ACTION_HTTP_REQUEST,
        ] {
            assert!(registry.contains(name), "missing builtin {name}");
        }
    }

    #[test]
    fn test_registration_overwrites() {
        let registry = ActionRegistry::new();
        registry.register_fn("deploy.k8s", |_params, _ctx| async {
            Ok(Value::String("v1".to_string()))
        });
        registry.register_fn("deploy.k8s", |_params, _ctx| async {
            Ok(Value::String("v2".to_string()))
        });
        assert!(registry.contains("deploy.k8s"));
        assert_eq!(registry.names().len(), 1);
    }

    #[tokio::test]
    async fn test_fn_action_executes() {
        let registry = ActionRegistry::new();
        registry.register_fn("echo", |params, _ctx| async move {
            Ok(params.get("value").cloned().unwrap_or(Value::Null))
        });
        let action = registry.get("echo").unwrap();
        let result = action
            .execute(params(json!({"value": 42})), test_ctx())
            .await
            .unwrap();
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn test_log_action_levels() {
        let ctx = test_ctx();
        let result = LogMessageAction
            .execute(params(json!({"message": "hello", "level": "warning"})), ctx)
            .await
            .unwrap();
        assert_eq!(result, json!("hello"));

        let err = LogMessageAction
            .execute(params(json!({"message": "x", "level": "loud"})), test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidParam { .. }));
    }

    #[tokio::test]
    async fn test_log_action_missing_message() {
        let err = LogMessageAction
            .execute(Map::new(), test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingParam { name } if name == "message"));
    }

    #[tokio::test]
    async fn test_set_output_action() {
        let (events, _) = broadcast::channel(16);
        let run = RunHandle::new(WorkflowId::new("wf"), HashMap::new(), None, None, events);
        let ctx = ExecutionContext::new(run.clone(), StepId::new("init"));

        SetOutputAction
            .execute(params(json!({"name": "environment", "value": "staging"})), ctx)
            .await
            .unwrap();
        assert_eq!(run.output("environment"), Some(json!("staging")));
        assert_eq!(run.output("init.environment"), Some(json!("staging")));
    }

    #[tokio::test]
    async fn test_shell_action_captures_output() {
        let result = ShellAction
            .execute(params(json!({"command": "echo hello"})), test_ctx())
            .await
            .unwrap();
        assert_eq!(result["exitCode"], json!(0));
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn test_shell_action_nonzero_exit_fails() {
        let err = ShellAction
            .execute(params(json!({"command": "exit 3"})), test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::ExecutionFailed(msg) if msg.contains("code 3")));
    }

    #[tokio::test]
    async fn test_shell_action_explicit_args() {
        let result = ShellAction
            .execute(
                params(json!({"command": "echo", "args": ["a b", "c"]})),
                test_ctx(),
            )
            .await
            .unwrap();
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "a b c");
    }

    #[tokio::test]
    async fn test_notify_action_echoes_payload() {
        let result = NotifyAction::slack()
            .execute(
                params(json!({"target": "#ops", "message": "deployed"})),
                test_ctx(),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({"channel": "slack", "target": "#ops", "message": "deployed"})
        );
    }

    #[tokio::test]
    async fn test_http_request_defaults_to_post() {
        let result = HttpRequestAction
            .execute(
                params(json!({"target": "https://hooks.example.com/x", "message": "hi"})),
                test_ctx(),
            )
            .await
            .unwrap();
        assert_eq!(result["method"], json!("POST"));
        assert_eq!(result["url"], json!("https://hooks.example.com/x"));
    }
}
