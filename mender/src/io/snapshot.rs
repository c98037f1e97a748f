//! Run snapshot export (`run.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::types::WorkflowRun;
use crate::io::config::write_atomic;

/// Atomically write the canonical JSON mapping of `run`.
pub fn write_run_snapshot(path: &Path, run: &WorkflowRun) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(run).context("serialize run snapshot")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

pub fn load_run_snapshot(path: &Path) -> Result<WorkflowRun> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
