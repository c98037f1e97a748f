//! Artifact generation at workflow completion.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use crate::core::types::{Artifact, TaskStatus, WorkflowRun};
use crate::io::config::write_atomic;

const RUN_REPORT_TEMPLATE: &str = include_str!("templates/run_report.md");

/// Characters of artifact content kept as an inline preview.
const PREVIEW_CHARS: usize = 200;

/// Parameters for artifact generation.
#[derive(Debug, Clone)]
pub struct ArtifactRequest<'a> {
    pub run: &'a WorkflowRun,
    /// Final accepted output per task id.
    pub outputs: &'a Map<String, Value>,
    pub timeout: Duration,
}

pub trait ArtifactGenerator: Send + Sync {
    fn generate(&self, request: &ArtifactRequest<'_>) -> Result<Vec<Artifact>>;
}

/// Produces `run_report.md`, `task_results.json` and `execution_log.txt`.
///
/// Artifacts are verified only when every task succeeded. With an output
/// directory set, each file is written to `<dir>/<workflow_id>/`.
#[derive(Debug, Default, Clone)]
pub struct ReportArtifacts {
    output_dir: Option<PathBuf>,
}

impl ReportArtifacts {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self { output_dir }
    }

    fn emit(&self, run: &WorkflowRun, name: &str, kind: &str, contents: String) -> Result<Artifact> {
        let path = match &self.output_dir {
            Some(dir) => {
                let path = dir.join(&run.workflow_id).join(name);
                write_atomic(&path, contents.as_bytes())?;
                Some(path_string(&path))
            }
            None => None,
        };
        let verified = run.tasks.iter().all(|task| task.status.is_success());
        Ok(Artifact {
            name: name.to_string(),
            kind: kind.to_string(),
            size: contents.len() as u64,
            verified,
            path,
            content_preview: Some(contents.chars().take(PREVIEW_CHARS).collect()),
        })
    }
}

impl ArtifactGenerator for ReportArtifacts {
    #[instrument(skip_all, fields(workflow_id = %request.run.workflow_id))]
    fn generate(&self, request: &ArtifactRequest<'_>) -> Result<Vec<Artifact>> {
        let run = request.run;
        let artifacts = vec![
            self.emit(run, "run_report.md", "document", render_report(run)?)?,
            self.emit(
                run,
                "task_results.json",
                "data",
                render_results(run, request.outputs)?,
            )?,
            self.emit(run, "execution_log.txt", "log", render_log(run))?,
        ];
        debug!(count = artifacts.len(), "artifacts generated");
        Ok(artifacts)
    }
}

fn render_report(run: &WorkflowRun) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("run_report", RUN_REPORT_TEMPLATE)
        .context("load run report template")?;
    let template = env.get_template("run_report")?;
    let succeeded = run
        .tasks
        .iter()
        .filter(|task| task.status.is_success())
        .count();
    let corrected = run
        .tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Corrected)
        .count();
    let rendered = template
        .render(context! {
            name => run.name,
            workflow_id => run.workflow_id,
            created_at => run.created_at.to_rfc3339(),
            tasks => run.tasks,
            succeeded => succeeded,
            corrected => corrected,
        })
        .context("render run report")?;
    Ok(rendered)
}

fn render_results(run: &WorkflowRun, outputs: &Map<String, Value>) -> Result<String> {
    let tasks: Vec<Value> = run
        .tasks
        .iter()
        .map(|task| {
            json!({
                "id": task.id,
                "step_number": task.step_number,
                "description": task.description,
                "status": task.status,
                "correction_attempts": task.correction_attempts,
                "output": outputs.get(&task.id),
            })
        })
        .collect();
    let mut buf = serde_json::to_string_pretty(&json!({
        "workflow_id": run.workflow_id,
        "tasks": tasks,
    }))
    .context("serialize task results")?;
    buf.push('\n');
    Ok(buf)
}

fn render_log(run: &WorkflowRun) -> String {
    let mut buf = String::new();
    for entry in &run.logs {
        let _ = writeln!(
            buf,
            "{} [{}] {}",
            entry.timestamp.to_rfc3339(),
            entry.level.label(),
            entry.message
        );
    }
    buf
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
