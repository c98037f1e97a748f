//! Task runner abstraction.
//!
//! The [`TaskRunner`] trait decouples the controller from whatever actually
//! performs a step. `Err` from a runner is a collaborator fault; a
//! [`RunnerOutcome::Failure`] is a reported task failure that enters the
//! correction loop like any failed validation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::core::types::{Task, TaskOutput};
use crate::io::config::Settings;
use crate::io::ingest::IngestedInput;
use crate::io::process::run_json_command;

/// Result of a single task execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerOutcome {
    Output(TaskOutput),
    Failure { message: String },
}

/// Parameters for a runner invocation.
///
/// `inputs` are always the originally ingested inputs; re-executions during
/// correction see the task's correction history through `task.corrections`.
#[derive(Debug, Clone)]
pub struct ExecRequest<'a> {
    pub task: &'a Task,
    pub inputs: &'a [IngestedInput],
    pub timeout: Duration,
}

pub trait TaskRunner: Send + Sync {
    fn execute(&self, request: &ExecRequest<'_>) -> Result<RunnerOutcome>;
}

/// Deterministic in-process runner.
///
/// Produces `{task_id, result, data, citations}` from the task and the input
/// names, so workflows run end to end with no external service.
#[derive(Debug, Default, Clone)]
pub struct LocalTaskRunner;

impl TaskRunner for LocalTaskRunner {
    fn execute(&self, request: &ExecRequest<'_>) -> Result<RunnerOutcome> {
        let task = request.task;
        debug!(task_id = %task.id, "running task locally");
        Ok(RunnerOutcome::Output(json!({
            "task_id": task.id,
            "result": format!("Completed: {}", task.description),
            "data": {
                "step_number": task.step_number,
                "inputs": request.inputs.len(),
                "attempt": task.correction_attempts,
            },
            "citations": citations_for(task, request.inputs),
        })))
    }
}

/// Input names, or a reference to the task itself when there are no inputs.
pub fn citations_for(task: &Task, inputs: &[IngestedInput]) -> Vec<String> {
    if inputs.is_empty() {
        return vec![format!("plan:{}", task.id)];
    }
    inputs.iter().map(|input| input.name.clone()).collect()
}

/// Runner backed by an external command.
///
/// Stdin: `{"task", "inputs"}`. Stdout: the task output JSON, or
/// `{"failure": "<message>"}` to report a task failure.
#[derive(Debug, Clone)]
pub struct CommandTaskRunner {
    argv: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandTaskRunner {
    pub fn new(argv: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            output_limit_bytes,
        }
    }
}

impl TaskRunner for CommandTaskRunner {
    #[instrument(skip_all, fields(task_id = %request.task.id, timeout_secs = request.timeout.as_secs()))]
    fn execute(&self, request: &ExecRequest<'_>) -> Result<RunnerOutcome> {
        info!("invoking runner command");
        let payload = json!({
            "task": request.task,
            "inputs": request.inputs,
        });
        let response = run_json_command(
            "runner",
            &self.argv,
            &payload,
            request.timeout,
            self.output_limit_bytes,
        )?;
        Ok(classify_response(response))
    }
}

fn classify_response(response: Value) -> RunnerOutcome {
    if let Some(object) = response.as_object()
        && object.len() == 1
        && let Some(message) = object.get("failure").and_then(Value::as_str)
    {
        return RunnerOutcome::Failure {
            message: message.to_string(),
        };
    }
    RunnerOutcome::Output(response)
}

/// Pick the task runner configured in `settings`.
pub fn runner_from_settings(settings: &Settings) -> Arc<dyn TaskRunner> {
    match &settings.commands.runner {
        Some(argv) => Arc::new(CommandTaskRunner::new(
            argv.clone(),
            settings.output_limit_bytes,
        )),
        None => Arc::new(LocalTaskRunner),
    }
}
