//! Workflow controller: drives one run through ingestion, planning, per-task
//! execution with validation and bounded correction, and artifact generation.
//!
//! The controller owns the [`WorkflowRun`] for the lifetime of a call to
//! [`WorkflowController::run`]. Collaborators only ever see shared references
//! to request values and cannot mutate run state. Every stage transition is
//! checked against [`Stage::can_transition_to`], logged, and pushed to the
//! bound observers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::core::budget::{CallTimeout, ensure_within};
use crate::core::progress;
use crate::core::strategy::StrategyTable;
use crate::core::types::{
    LogEntry, LogLevel, Metadata, Severity, Stage, Task, TaskOutput, TaskStatus, ValidationResult,
    WorkflowConfig, WorkflowRun, new_workflow_id,
};
use crate::error::{ErrorKind, WorkflowExecutionError};
use crate::io::artifacts::{ArtifactGenerator, ArtifactRequest, ReportArtifacts};
use crate::io::config::{FailurePolicy, Settings};
use crate::io::corrector::{Corrector, CorrectionRequest, StrategyCorrector};
use crate::io::ingest::{IngestRequest, IngestedInput, Ingestor, LocatorIngestor};
use crate::io::observer::RunObserver;
use crate::io::planner::{PlanRequest, Planner, planner_from_settings};
use crate::io::task_runner::{ExecRequest, RunnerOutcome, TaskRunner, runner_from_settings};
use crate::io::validator::{ValidateRequest, Validator, build_rule_engine};

/// Cooperative cancellation flag shared between a controller and its callers.
///
/// Checked before and after every collaborator call; an in-flight call is
/// always allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives workflow runs, one at a time.
pub struct WorkflowController {
    settings: Settings,
    planner: Option<Arc<dyn Planner>>,
    runner: Option<Arc<dyn TaskRunner>>,
    validator: Option<Arc<dyn Validator>>,
    corrector: Option<Arc<dyn Corrector>>,
    ingestor: Arc<dyn Ingestor>,
    artifacts: Arc<dyn ArtifactGenerator>,
    observers: Vec<Arc<dyn RunObserver>>,
    strategies: StrategyTable,
    cancel: CancellationToken,
    active: AtomicBool,
}

impl WorkflowController {
    /// A controller with no planner, runner, validator or corrector bound.
    ///
    /// Ingestion and artifact generation default to [`LocatorIngestor`] and an
    /// in-memory [`ReportArtifacts`].
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            planner: None,
            runner: None,
            validator: None,
            corrector: None,
            ingestor: Arc::new(LocatorIngestor),
            artifacts: Arc::new(ReportArtifacts::default()),
            observers: Vec::new(),
            strategies: StrategyTable::default(),
            cancel: CancellationToken::new(),
            active: AtomicBool::new(false),
        }
    }

    /// A fully bound controller built from settings: configured or built-in
    /// planner and runner, the configured rule engine, the strategy corrector,
    /// and the configured strategy table.
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        settings.validate()?;
        let planner = planner_from_settings(&settings);
        let runner = runner_from_settings(&settings);
        let validator: Arc<dyn Validator> = Arc::new(build_rule_engine(&settings.validation)?);
        let corrector: Arc<dyn Corrector> = Arc::new(StrategyCorrector::new(
            settings.validation.required_fields.clone(),
        ));
        let strategies = settings.strategy_table()?;
        let artifacts: Arc<dyn ArtifactGenerator> = Arc::new(ReportArtifacts::new(
            settings.artifacts.output_dir.clone(),
        ));
        Ok(Self::new(settings)
            .with_planner(planner)
            .with_runner(runner)
            .with_validator(validator)
            .with_corrector(corrector)
            .with_strategies(strategies)
            .with_artifacts(artifacts))
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_corrector(mut self, corrector: Arc<dyn Corrector>) -> Self {
        self.corrector = Some(corrector);
        self
    }

    pub fn with_ingestor(mut self, ingestor: Arc<dyn Ingestor>) -> Self {
        self.ingestor = ingestor;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactGenerator>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_strategies(mut self, strategies: StrategyTable) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Use an externally created token, e.g. one registered before the run id
    /// is handed to a client.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run a workflow under a freshly generated id.
    pub fn run(&self, config: &WorkflowConfig) -> Result<WorkflowRun, WorkflowExecutionError> {
        self.run_with_id(new_workflow_id(), config)
    }

    /// Run a workflow under a caller-chosen id.
    ///
    /// Returns the terminal run (`completed`, or `failed` after correction
    /// exhaustion under fail-fast). Collaborator faults, timeouts and
    /// cancellation are returned as errors carrying the final snapshot.
    #[instrument(skip_all, fields(workflow_id = tracing::field::Empty))]
    pub fn run_with_id(
        &self,
        workflow_id: impl Into<String>,
        config: &WorkflowConfig,
    ) -> Result<WorkflowRun, WorkflowExecutionError> {
        let workflow_id = workflow_id.into();
        tracing::Span::current().record("workflow_id", workflow_id.as_str());

        if config.name.trim().is_empty() {
            return Err(WorkflowExecutionError::new(workflow_id, ErrorKind::InvalidConfig)
                .with_source(anyhow!("workflow name must not be empty")));
        }
        let bound = self.bound(&workflow_id)?;
        let Some(_active) = ActiveRun::acquire(&self.active) else {
            return Err(WorkflowExecutionError::new(workflow_id, ErrorKind::Busy));
        };

        info!(name = %config.name, inputs = config.inputs.len(), "workflow starting");
        let mut session = Session {
            ctl: self,
            bound,
            config,
            run: WorkflowRun::new(workflow_id, config.name.clone()),
            inputs: Vec::new(),
            outputs: Map::new(),
        };
        match session.execute() {
            Ok(()) => {
                info!(stage = %session.run.stage, "workflow finished");
                Ok(session.run)
            }
            Err(abort) => Err(session.abort(abort)),
        }
    }

    fn bound(&self, workflow_id: &str) -> Result<Bound<'_>, WorkflowExecutionError> {
        let unbound = |name| WorkflowExecutionError::new(workflow_id, ErrorKind::Unbound(name));
        Ok(Bound {
            planner: self.planner.as_deref().ok_or_else(|| unbound("planner"))?,
            runner: self.runner.as_deref().ok_or_else(|| unbound("task runner"))?,
            validator: self.validator.as_deref().ok_or_else(|| unbound("validator"))?,
            corrector: self.corrector.as_deref().ok_or_else(|| unbound("corrector"))?,
        })
    }
}

/// Clears the controller's active flag when the run ends, however it ends.
struct ActiveRun<'a>(&'a AtomicBool);

impl<'a> ActiveRun<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Bound<'a> {
    planner: &'a dyn Planner,
    runner: &'a dyn TaskRunner,
    validator: &'a dyn Validator,
    corrector: &'a dyn Corrector,
}

/// Why a run stopped early.
enum Abort {
    Cancelled,
    Fault {
        kind: ErrorKind,
        source: anyhow::Error,
    },
}

impl Abort {
    fn internal(source: anyhow::Error) -> Self {
        Abort::Fault {
            kind: ErrorKind::Internal,
            source,
        }
    }
}

/// How a task's processing ended.
enum TaskFate {
    Succeeded,
    Exhausted,
}

/// Call a collaborator with cancellation checks on both sides and the
/// time budget enforced on return.
fn invoke<T>(
    cancel: &CancellationToken,
    stage: Stage,
    collaborator: &'static str,
    timeout: Duration,
    call: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, Abort> {
    if cancel.is_cancelled() {
        return Err(Abort::Cancelled);
    }
    let started = Instant::now();
    let result = call();
    if cancel.is_cancelled() {
        debug!(collaborator, "discarding result of call finished after cancellation");
        return Err(Abort::Cancelled);
    }
    let value = result.map_err(|source| {
        let kind = if source.chain().any(|cause| cause.is::<CallTimeout>()) {
            ErrorKind::Timeout {
                stage,
                collaborator,
            }
        } else {
            ErrorKind::Collaborator {
                stage,
                collaborator,
            }
        };
        Abort::Fault { kind, source }
    })?;
    ensure_within(collaborator, started, timeout).map_err(|overrun| Abort::Fault {
        kind: ErrorKind::Timeout {
            stage,
            collaborator,
        },
        source: overrun.into(),
    })?;
    Ok(value)
}

fn fields(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

struct Session<'a> {
    ctl: &'a WorkflowController,
    bound: Bound<'a>,
    config: &'a WorkflowConfig,
    run: WorkflowRun,
    inputs: Vec<IngestedInput>,
    /// Accepted output per task id, handed to artifact generation.
    outputs: Map<String, Value>,
}

impl Session<'_> {
    fn execute(&mut self) -> Result<(), Abort> {
        self.log(
            LogLevel::Info,
            format!("Workflow started: {}", self.config.name),
            fields(json!({"workflow_id": self.run.workflow_id})),
        );

        self.ingest()?;
        self.plan()?;

        let total = self.run.tasks.len();
        let mut finished = 0;
        for index in 0..total {
            if self.ctl.cancel.is_cancelled() {
                return Err(Abort::Cancelled);
            }
            if self.run.stage != Stage::Executing {
                self.enter(Stage::Executing)?;
            }
            let fate = self.process_task(index)?;
            finished += 1;
            self.set_progress(progress::task_progress(finished, total));

            if let TaskFate::Exhausted = fate {
                let task_id = self.run.tasks[index].id.clone();
                match self.ctl.settings.failure_policy {
                    FailurePolicy::FailFast => {
                        self.fail_run(&task_id)?;
                        return Ok(());
                    }
                    FailurePolicy::BestEffort => self.log(
                        LogLevel::Warning,
                        format!("Continuing past failed {task_id}"),
                        fields(json!({"task_id": task_id, "policy": "best_effort"})),
                    ),
                }
            }
        }

        self.generate_artifacts()?;
        self.complete()
    }

    fn ingest(&mut self) -> Result<(), Abort> {
        self.enter(Stage::Ingesting)?;
        let timeout = self.ctl.settings.timeouts.ingest();
        let ingestor = Arc::clone(&self.ctl.ingestor);
        let config = self.config;
        for input in &config.inputs {
            let ingested = invoke(
                &self.ctl.cancel,
                Stage::Ingesting,
                "ingestor",
                timeout,
                || ingestor.process(&IngestRequest { input, timeout }),
            )?;
            self.inputs.push(ingested);
        }
        self.set_progress(progress::INGESTED);
        let names: Vec<&str> = self.inputs.iter().map(|input| input.name.as_str()).collect();
        let message = format!("Ingested {} input(s)", names.len());
        let metadata = fields(json!({"count": names.len(), "names": names}));
        self.log(LogLevel::Success, message, metadata);
        Ok(())
    }

    fn plan(&mut self) -> Result<(), Abort> {
        self.enter(Stage::Planning)?;
        let timeout = self.ctl.settings.timeouts.planner();
        let steps = invoke(
            &self.ctl.cancel,
            Stage::Planning,
            "planner",
            timeout,
            || {
                self.bound.planner.plan(&PlanRequest {
                    config: self.config,
                    inputs: &self.inputs,
                    timeout,
                })
            },
        )?;
        if steps.is_empty() {
            return Err(Abort::Fault {
                kind: ErrorKind::Collaborator {
                    stage: Stage::Planning,
                    collaborator: "planner",
                },
                source: anyhow!("planner returned an empty plan"),
            });
        }

        self.run.tasks = steps
            .into_iter()
            .zip(1u32..)
            .map(|(description, step)| Task::new(step, description))
            .collect();
        self.set_progress(progress::PLANNED);
        let count = self.run.tasks.len();
        self.log(
            LogLevel::Success,
            format!("Plan ready: {count} task(s)"),
            fields(json!({"tasks": count})),
        );
        self.enter(Stage::Executing)
    }

    /// Execute, validate and, if needed, correct one task. Leaves the run in
    /// the `validating` stage.
    fn process_task(&mut self, index: usize) -> Result<TaskFate, Abort> {
        self.set_task_status(index, TaskStatus::Running)?;
        let (task_id, description) = {
            let task = &mut self.run.tasks[index];
            task.started_at = Some(Utc::now());
            (task.id.clone(), task.description.clone())
        };
        self.log(
            LogLevel::Info,
            format!("Starting {task_id}: {description}"),
            fields(json!({"task_id": task_id})),
        );

        let outcome = self.execute_task(index)?;
        self.enter(Stage::Validating)?;
        let (mut validation, mut output) = self.assess(index, outcome)?;
        if validation.passed {
            self.accept(index, output, TaskStatus::Completed)?;
            return Ok(TaskFate::Succeeded);
        }
        self.reject(index, &validation)?;

        let max_attempts = self.ctl.settings.max_attempts;
        while self.run.tasks[index].correction_attempts < max_attempts {
            self.enter(Stage::Correcting)?;
            let strategy = self
                .ctl
                .strategies
                .select(&self.run.tasks[index], &validation);
            let attempt = {
                let task = &mut self.run.tasks[index];
                task.correction_attempts += 1;
                task.correction_attempts
            };
            self.set_task_status(index, TaskStatus::Running)?;
            self.log(
                LogLevel::Info,
                format!("Correction attempt {attempt}/{max_attempts} for {task_id}: {strategy}"),
                fields(json!({"task_id": task_id, "attempt": attempt, "strategy": strategy})),
            );

            let timeout = self.ctl.settings.timeouts.corrector();
            let correction = {
                let task = &self.run.tasks[index];
                let request = CorrectionRequest {
                    task,
                    validation: &validation,
                    output: output.as_ref(),
                    inputs: &self.inputs,
                    strategy: &strategy,
                    attempt,
                    timeout,
                };
                invoke(
                    &self.ctl.cancel,
                    Stage::Correcting,
                    "corrector",
                    timeout,
                    || self.bound.corrector.apply(&request),
                )?
            };

            let record = correction.record;
            self.run.tasks[index].corrections.push(record.clone());
            self.run.correction = Some(record.clone());
            self.log(
                LogLevel::Info,
                format!("Applied correction to {task_id}: {}", record.action),
                fields(json!({
                    "task_id": task_id,
                    "strategy": record.strategy,
                    "confidence": record.confidence,
                    "attempt": record.attempt,
                })),
            );

            let outcome = match correction.revised_output {
                Some(revised) => RunnerOutcome::Output(revised),
                None => self.execute_task(index)?,
            };
            self.enter(Stage::Validating)?;
            (validation, output) = self.assess(index, outcome)?;
            if validation.passed {
                self.accept(index, output, TaskStatus::Corrected)?;
                return Ok(TaskFate::Succeeded);
            }
            self.reject(index, &validation)?;
        }

        self.run.tasks[index].completed_at = Some(Utc::now());
        self.log(
            LogLevel::Error,
            format!("{task_id} failed after {max_attempts} correction attempt(s)"),
            fields(json!({"task_id": task_id, "issues": validation.issues})),
        );
        Ok(TaskFate::Exhausted)
    }

    fn execute_task(&self, index: usize) -> Result<RunnerOutcome, Abort> {
        let timeout = self.ctl.settings.timeouts.runner();
        let task = &self.run.tasks[index];
        invoke(
            &self.ctl.cancel,
            self.run.stage,
            "task runner",
            timeout,
            || {
                self.bound.runner.execute(&ExecRequest {
                    task,
                    inputs: &self.inputs,
                    timeout,
                })
            },
        )
    }

    /// Validate a runner outcome. A reported runner failure becomes a failed
    /// validation so it enters the correction loop.
    fn assess(
        &self,
        index: usize,
        outcome: RunnerOutcome,
    ) -> Result<(ValidationResult, Option<TaskOutput>), Abort> {
        let task = &self.run.tasks[index];
        match outcome {
            RunnerOutcome::Failure { message } => Ok((
                ValidationResult::fail(task.id.clone(), Severity::High, vec![message]),
                None,
            )),
            RunnerOutcome::Output(output) => {
                let timeout = self.ctl.settings.timeouts.validator();
                let validation = invoke(
                    &self.ctl.cancel,
                    Stage::Validating,
                    "validator",
                    timeout,
                    || {
                        self.bound.validator.validate(&ValidateRequest {
                            task,
                            output: &output,
                            timeout,
                        })
                    },
                )?;
                Ok((validation, Some(output)))
            }
        }
    }

    fn accept(
        &mut self,
        index: usize,
        output: Option<TaskOutput>,
        status: TaskStatus,
    ) -> Result<(), Abort> {
        self.set_task_status(index, status)?;
        let task = &mut self.run.tasks[index];
        task.completed_at = Some(Utc::now());
        task.error = None;
        task.correction_applied = status == TaskStatus::Corrected;
        let task_id = task.id.clone();
        let attempts = task.correction_attempts;
        if let Some(output) = output {
            self.outputs.insert(task_id.clone(), output);
        }
        let message = match status {
            TaskStatus::Corrected => {
                format!("{task_id} corrected after {attempts} attempt(s)")
            }
            _ => format!("{task_id} completed"),
        };
        self.log(
            LogLevel::Success,
            message,
            fields(json!({"task_id": task_id, "status": status})),
        );
        Ok(())
    }

    fn reject(&mut self, index: usize, validation: &ValidationResult) -> Result<(), Abort> {
        self.set_task_status(index, TaskStatus::Failed)?;
        let summary = validation.summary();
        self.run.tasks[index].error = Some(summary.clone());
        self.run.validation_failure = Some(validation.clone());
        self.log(
            LogLevel::Warning,
            format!("Validation failed for {}: {summary}", validation.task_id),
            fields(json!({
                "task_id": validation.task_id,
                "severity": validation.severity,
                "issues": validation.issues,
            })),
        );
        Ok(())
    }

    fn generate_artifacts(&mut self) -> Result<(), Abort> {
        self.log(LogLevel::Info, "Generating artifacts", Metadata::new());
        let timeout = self.ctl.settings.timeouts.artifacts();
        let generator = Arc::clone(&self.ctl.artifacts);
        let artifacts = invoke(
            &self.ctl.cancel,
            self.run.stage,
            "artifact generator",
            timeout,
            || {
                generator.generate(&ArtifactRequest {
                    run: &self.run,
                    outputs: &self.outputs,
                    timeout,
                })
            },
        )?;
        for artifact in &artifacts {
            self.log(
                LogLevel::Success,
                format!("Generated artifact: {}", artifact.name),
                fields(json!({
                    "type": artifact.kind,
                    "size": artifact.size,
                    "verified": artifact.verified,
                })),
            );
        }
        self.run.artifacts = artifacts;
        Ok(())
    }

    fn complete(&mut self) -> Result<(), Abort> {
        self.ensure_transition(Stage::Completed)?;
        self.run.progress = progress::COMPLETE;
        self.run.completed_at = Some(Utc::now());
        self.enter(Stage::Completed)?;

        let failed = self.run.failed_tasks().count();
        if failed == 0 {
            self.log(LogLevel::Success, "Workflow completed", Metadata::new());
        } else {
            self.log(
                LogLevel::Warning,
                format!("Workflow completed with {failed} failed task(s)"),
                fields(json!({"failed_tasks": failed})),
            );
        }
        self.notify();
        Ok(())
    }

    /// Correction exhaustion under fail-fast: the run ends `failed`, normally.
    fn fail_run(&mut self, task_id: &str) -> Result<(), Abort> {
        self.run.completed_at = Some(Utc::now());
        self.enter(Stage::Failed)?;
        self.log(
            LogLevel::Error,
            format!("Workflow failed: {task_id} exhausted its correction attempts"),
            fields(json!({"task_id": task_id, "reason": "correction_exhausted"})),
        );
        self.notify();
        Ok(())
    }

    /// Stop the run after a fault or cancellation and build the error.
    fn abort(mut self, abort: Abort) -> WorkflowExecutionError {
        let (kind, source, reason) = match abort {
            Abort::Cancelled => (ErrorKind::Cancelled, None, "cancelled".to_string()),
            Abort::Fault { kind, source } => {
                let reason = format!("{source:#}");
                (kind, Some(source), reason)
            }
        };

        let now = Utc::now();
        for task in &mut self.run.tasks {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Failed;
                task.error = Some(reason.clone());
                task.completed_at = Some(now);
            }
        }
        if !self.run.stage.is_terminal() {
            self.run.stage = Stage::Failed;
        }
        self.run.completed_at = Some(now);

        let message = match &kind {
            ErrorKind::Cancelled => "Workflow cancelled".to_string(),
            other => format!("Workflow failed: {other}: {reason}"),
        };
        let cause = match &kind {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout { .. } => "timeout",
            _ => "fault",
        };
        self.log(
            LogLevel::Error,
            message,
            fields(json!({"reason": cause, "detail": reason, "stage": Stage::Failed})),
        );
        self.notify();

        let err = WorkflowExecutionError::new(self.run.workflow_id.clone(), kind);
        let err = match source {
            Some(source) => err.with_source(source),
            None => err,
        };
        err.with_run(self.run)
    }

    fn ensure_transition(&self, next: Stage) -> Result<(), Abort> {
        if self.run.stage.can_transition_to(next) {
            return Ok(());
        }
        Err(Abort::internal(anyhow!(
            "illegal stage transition {} -> {next}",
            self.run.stage
        )))
    }

    fn enter(&mut self, next: Stage) -> Result<(), Abort> {
        self.ensure_transition(next)?;
        self.run.stage = next;
        self.log(
            LogLevel::Info,
            format!("Stage: {next}"),
            fields(json!({"stage": next})),
        );
        self.notify();
        Ok(())
    }

    fn set_task_status(&mut self, index: usize, next: TaskStatus) -> Result<(), Abort> {
        let task = &mut self.run.tasks[index];
        if !task.status.can_transition_to(next) {
            return Err(Abort::internal(anyhow!(
                "illegal task transition {}: {} -> {next}",
                task.id,
                task.status
            )));
        }
        task.status = next;
        Ok(())
    }

    fn set_progress(&mut self, next: f64) {
        self.run.progress = progress::advance(self.run.progress, next);
    }

    /// Append to the run log, stamping current progress, and mirror to tracing.
    fn log(&mut self, level: LogLevel, message: impl Into<String>, mut metadata: Metadata) {
        let message = message.into();
        metadata.insert("progress".to_string(), json!(self.run.progress));
        let now = Utc::now();
        let timestamp = match self.run.logs.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let workflow_id = self.run.workflow_id.as_str();
        match level {
            LogLevel::Info | LogLevel::Success => info!(workflow_id, "{message}"),
            LogLevel::Warning => warn!(workflow_id, "{message}"),
            LogLevel::Error => error!(workflow_id, "{message}"),
        }
        self.run.logs.push(LogEntry {
            timestamp,
            level,
            message,
            metadata,
        });
    }

    fn notify(&self) {
        for observer in &self.ctl.observers {
            observer.on_update(&self.run);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::invariants::validate_run_invariants;
    use crate::core::types::InputDescriptor;

    #[test]
    fn unbound_collaborators_are_reported_without_a_run() {
        let controller = WorkflowController::new(Settings::default());
        let config = WorkflowConfig {
            name: "demo".to_string(),
            inputs: Vec::new(),
        };
        let err = controller.run(&config).expect_err("unbound");
        assert_eq!(err.kind, ErrorKind::Unbound("planner"));
        assert!(err.run.is_none());
    }

    #[test]
    fn empty_name_is_invalid_config() {
        let controller = WorkflowController::from_settings(Settings::default()).expect("build");
        let config = WorkflowConfig {
            name: "  ".to_string(),
            inputs: Vec::new(),
        };
        let err = controller.run(&config).expect_err("invalid");
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
    }

    #[test]
    fn active_flag_rejects_second_run() {
        let flag = AtomicBool::new(false);
        let first = ActiveRun::acquire(&flag).expect("first");
        assert!(ActiveRun::acquire(&flag).is_none());
        drop(first);
        assert!(ActiveRun::acquire(&flag).is_some());
    }

    #[test]
    fn invoke_classifies_typed_timeouts() {
        let token = CancellationToken::new();
        let result: Result<(), Abort> = invoke(
            &token,
            Stage::Executing,
            "task runner",
            Duration::from_secs(60),
            || {
                Err(anyhow::Error::new(CallTimeout {
                    collaborator: "runner",
                    timeout: Duration::from_secs(1),
                    elapsed: Duration::from_secs(1),
                })
                .context("run command"))
            },
        );
        match result {
            Err(Abort::Fault { kind, .. }) => assert_eq!(
                kind,
                ErrorKind::Timeout {
                    stage: Stage::Executing,
                    collaborator: "task runner"
                }
            ),
            _ => panic!("expected timeout fault"),
        }
    }

    #[test]
    fn invoke_skips_call_once_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let mut called = false;
        let result = invoke(&token, Stage::Planning, "planner", Duration::from_secs(1), || {
            called = true;
            Ok(())
        });
        assert!(matches!(result, Err(Abort::Cancelled)));
        assert!(!called);
    }

    #[test]
    fn built_in_stack_completes_a_research_workflow() {
        let controller = WorkflowController::from_settings(Settings::default()).expect("build");
        let config = WorkflowConfig {
            name: "Research synthesis".to_string(),
            inputs: vec![InputDescriptor::new("url", "https://example.com")],
        };
        let run = controller.run(&config).expect("run");
        assert_eq!(run.stage, Stage::Completed);
        assert_eq!(run.tasks.len(), 5);
        assert!(run.tasks.iter().all(|t| t.status == TaskStatus::Completed));
        assert_eq!(run.artifacts.len(), 3);
        assert!(validate_run_invariants(&run, 3).is_empty());
    }
}
