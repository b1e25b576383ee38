//! Validate command implementation

use colored::Colorize;
use std::path::Path;

use opsflow::OpsFlowError;

use crate::exit_codes::{EXIT_SUCCESS, EXIT_VALIDATION};

/// Parse and validate a workflow file, reporting problems
pub fn validate_command(file: &Path) -> anyhow::Result<i32> {
    match opsflow::workflow_from_yaml_file(file) {
        Ok(workflow) => {
            println!(
                "{} workflow '{}' is valid ({} steps)",
                "✓".green(),
                workflow.id,
                workflow.steps.len()
            );
            Ok(EXIT_SUCCESS)
        }
        Err(OpsFlowError::InvalidWorkflow { id, reasons }) => {
            eprintln!("{} workflow '{id}' is invalid:", "✗".red());
            for reason in reasons.split("; ") {
                eprintln!("  - {reason}");
            }
            Ok(EXIT_VALIDATION)
        }
        Err(err @ OpsFlowError::Yaml(_)) => {
            eprintln!("{} {err}", "✗".red());
            Ok(EXIT_VALIDATION)
        }
        Err(err) => Err(err.into()),
    }
}
