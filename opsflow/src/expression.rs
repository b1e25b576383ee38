//! Placeholder resolution and condition evaluation
//!
//! Two placeholder forms exist: `${{ ... }}` inside task parameter strings
//! and `{{ ... }}` inside notification templates. Paths are `env.NAME`,
//! `outputs.NAME` or `steps.NAME` (the latter two both read the flat outputs
//! map). Unrecognized placeholders resolve to the empty string, never an
//! error, so a missing variable cannot fail a notification.
//!
//! Conditions are a deliberately minimal micro-grammar: literal
//! `true`/`false`, or `outputs.<key> <op> <value>` / `env.<key> <op> <value>`
//! with op one of `==`, `!=`, `>`, `<`, `>=`, `<=`. No boolean composition.
//! Anything that doesn't match evaluates to `false`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

static PARAM_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("param placeholder regex"));

static TEMPLATE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("template placeholder regex"));

static CONDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(outputs|env)\.([A-Za-z0-9_][A-Za-z0-9_.-]*)\s*(==|!=|>=|<=|>|<)\s*(.+)$")
        .expect("condition regex")
});

/// Resolve `${{ ... }}` placeholders in a parameter string
pub fn resolve_param_str(
    input: &str,
    env: &HashMap<String, String>,
    outputs: &HashMap<String, Value>,
) -> String {
    PARAM_PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| {
            lookup(&caps[1], env, outputs).unwrap_or_default()
        })
        .into_owned()
}

/// Resolve `${{ ... }}` placeholders recursively through a parameter value
///
/// Only string leaves are rewritten; numbers, booleans and nulls pass through
/// untouched.
pub fn resolve_params(
    value: &Value,
    env: &HashMap<String, String>,
    outputs: &HashMap<String, Value>,
) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_param_str(s, env, outputs)),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| resolve_params(v, env, outputs)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_params(v, env, outputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve `{{ ... }}` placeholders in a notification template
pub fn resolve_template(
    input: &str,
    env: &HashMap<String, String>,
    outputs: &HashMap<String, Value>,
) -> String {
    TEMPLATE_PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| {
            lookup(&caps[1], env, outputs).unwrap_or_default()
        })
        .into_owned()
}

/// Evaluate a condition expression against the run's outputs and merged env
pub fn evaluate_condition(
    expression: &str,
    env: &HashMap<String, String>,
    outputs: &HashMap<String, Value>,
) -> bool {
    let expression = expression.trim();
    match expression {
        "true" => return true,
        "false" => return false,
        _ => {}
    }

    let Some(caps) = CONDITION.captures(expression) else {
        return false;
    };

    let lhs = lookup(&format!("{}.{}", &caps[1], &caps[2]), env, outputs);
    let op = &caps[3];
    let rhs = strip_quotes(caps[4].trim());

    match op {
        "==" => lhs.unwrap_or_default() == rhs,
        "!=" => lhs.unwrap_or_default() != rhs,
        // Numeric comparisons coerce both sides; anything non-numeric
        // (including a missing key) is false.
        _ => {
            let (Some(lhs), Ok(rhs)) = (lhs.and_then(|v| v.parse::<f64>().ok()), rhs.parse::<f64>())
            else {
                return false;
            };
            match op {
                ">" => lhs > rhs,
                "<" => lhs < rhs,
                ">=" => lhs >= rhs,
                "<=" => lhs <= rhs,
                _ => false,
            }
        }
    }
}

/// Render a JSON value the way placeholder substitution expects: strings
/// without surrounding quotes, everything else via its JSON form
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lookup(
    path: &str,
    env: &HashMap<String, String>,
    outputs: &HashMap<String, Value>,
) -> Option<String> {
    let (scope, key) = path.split_once('.')?;
    match scope {
        "env" => env.get(key).cloned(),
        "outputs" | "steps" => outputs.get(key).map(value_to_string),
        _ => None,
    }
}

fn strip_quotes(s: &str) -> String {
    let stripped = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    stripped.unwrap_or(s).to_string()
}
