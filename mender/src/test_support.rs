//! Scripted collaborators and fixtures for controller tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::json;

use crate::controller::WorkflowController;
use crate::core::budget::CallTimeout;
use crate::core::rules::RuleEngine;
use crate::core::types::{InputDescriptor, Stage, Task, TaskOutput, WorkflowConfig, WorkflowRun};
use crate::io::config::Settings;
use crate::io::corrector::StrategyCorrector;
use crate::io::observer::RunObserver;
use crate::io::planner::{PlanRequest, Planner};
use crate::io::task_runner::{ExecRequest, RunnerOutcome, TaskRunner};

/// Output that passes the standard rules.
pub fn good_output() -> TaskOutput {
    json!({
        "result": "ok",
        "data": {"processed": true},
        "citations": ["source.pdf"],
    })
}

/// Output whose empty citation list reads as an unhandled edge case.
pub fn edge_case_output() -> TaskOutput {
    json!({
        "result": "ok",
        "data": {"processed": true},
        "citations": [],
    })
}

/// Output missing a required field; not patchable by re-running.
pub fn incomplete_output() -> TaskOutput {
    json!({
        "data": {"processed": false},
        "citations": ["source.pdf"],
    })
}

pub fn workflow(name: &str, inputs: &[(&str, &str)]) -> WorkflowConfig {
    WorkflowConfig {
        name: name.to_string(),
        inputs: inputs
            .iter()
            .map(|(kind, name)| InputDescriptor::new(*kind, *name))
            .collect(),
    }
}

/// Controller with a scripted planner and runner, the standard rules and the
/// strategy corrector.
pub fn scripted_controller(
    settings: Settings,
    steps: &[&str],
    runner: Arc<ScriptedRunner>,
) -> WorkflowController {
    WorkflowController::new(settings)
        .with_planner(Arc::new(ScriptedPlanner::new(steps)))
        .with_runner(runner)
        .with_validator(Arc::new(RuleEngine::default()))
        .with_corrector(Arc::new(StrategyCorrector::default()))
}

/// Planner returning a fixed plan, or a fault.
pub struct ScriptedPlanner {
    steps: Result<Vec<String>, String>,
}

impl ScriptedPlanner {
    pub fn new(steps: &[&str]) -> Self {
        Self {
            steps: Ok(steps.iter().map(|step| (*step).to_string()).collect()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            steps: Err(message.to_string()),
        }
    }
}

impl Planner for ScriptedPlanner {
    fn plan(&self, _request: &PlanRequest<'_>) -> Result<Vec<String>> {
        self.steps.clone().map_err(|message| anyhow!(message))
    }
}

/// One scripted runner response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Output(TaskOutput),
    /// A reported task failure.
    Failure(String),
    /// A collaborator fault.
    Fault(String),
    /// A fault carrying [`CallTimeout`].
    Timeout,
}

/// What the runner saw on one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerCall {
    pub task_id: String,
    pub input_names: Vec<String>,
    pub corrections_seen: usize,
}

type Hook = Box<dyn Fn(&Task) + Send + Sync>;

/// Runner with per-step response queues.
///
/// Once a step's queue is empty, the last scripted response for that step
/// repeats; unscripted steps return [`good_output`].
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<HashMap<u32, VecDeque<Scripted>>>,
    last: Mutex<HashMap<u32, Scripted>>,
    calls: Mutex<Vec<RunnerCall>>,
    hook: Option<Hook>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(self, step_number: u32, responses: Vec<Scripted>) -> Self {
        lock(&self.script).insert(step_number, responses.into());
        self
    }

    /// Run `hook` at the end of every call, before the response is returned.
    pub fn on_execute(mut self, hook: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, task_id: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.task_id == task_id)
            .count()
    }

    fn next_response(&self, step_number: u32) -> Scripted {
        let queued = lock(&self.script)
            .get_mut(&step_number)
            .and_then(VecDeque::pop_front);
        let mut last = lock(&self.last);
        match queued {
            Some(response) => {
                last.insert(step_number, response.clone());
                response
            }
            None => last
                .get(&step_number)
                .cloned()
                .unwrap_or_else(|| Scripted::Output(good_output())),
        }
    }
}

impl TaskRunner for ScriptedRunner {
    fn execute(&self, request: &ExecRequest<'_>) -> Result<RunnerOutcome> {
        let task = request.task;
        lock(&self.calls).push(RunnerCall {
            task_id: task.id.clone(),
            input_names: request
                .inputs
                .iter()
                .map(|input| input.name.clone())
                .collect(),
            corrections_seen: task.corrections.len(),
        });
        let response = self.next_response(task.step_number);
        if let Some(hook) = &self.hook {
            hook(task);
        }
        match response {
            Scripted::Output(output) => Ok(RunnerOutcome::Output(output)),
            Scripted::Failure(message) => Ok(RunnerOutcome::Failure { message }),
            Scripted::Fault(message) => Err(anyhow!(message)),
            Scripted::Timeout => Err(CallTimeout {
                collaborator: "runner",
                timeout: Duration::from_secs(1),
                elapsed: Duration::from_secs(2),
            }
            .into()),
        }
    }
}

/// Observer recording every snapshot it is shown.
#[derive(Default)]
pub struct RecordingObserver {
    snapshots: Mutex<Vec<WorkflowRun>>,
}

impl RecordingObserver {
    pub fn stages(&self) -> Vec<Stage> {
        lock(&self.snapshots).iter().map(|run| run.stage).collect()
    }

    pub fn snapshots(&self) -> Vec<WorkflowRun> {
        lock(&self.snapshots).clone()
    }
}

impl RunObserver for RecordingObserver {
    fn on_update(&self, run: &WorkflowRun) {
        lock(&self.snapshots).push(run.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
