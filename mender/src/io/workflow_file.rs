//! Workflow configs on disk (JSON, the same shape the HTTP API accepts).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::types::WorkflowConfig;

pub fn load_workflow_config(path: &Path) -> Result<WorkflowConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
