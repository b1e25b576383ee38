//! Loading workflow definitions from YAML

use std::path::Path;

use crate::definition::Workflow;
use crate::error::{OpsFlowError, Result};

/// Parse a workflow definition from YAML source and validate its structure
pub fn workflow_from_yaml(source: &str) -> Result<Workflow> {
    let workflow: Workflow = serde_yaml::from_str(source)?;
    if let Err(reasons) = workflow.validate_structure() {
        return Err(OpsFlowError::InvalidWorkflow {
            id: workflow.id.to_string(),
            reasons: reasons.join("; "),
        });
    }
    Ok(workflow)
}

/// Load and validate a workflow definition from a YAML file
pub fn workflow_from_yaml_file(path: impl AsRef<Path>) -> Result<Workflow> {
    let source = std::fs::read_to_string(path)?;
    workflow_from_yaml(&source)
}
