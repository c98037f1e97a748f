//! End-to-end controller scenarios with scripted planner and runner.
//!
//! Each scenario drives `WorkflowController::run` and then checks the
//! returned (or error-carried) run against the run invariants.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Result, bail};
use mender::core::invariants::validate_run_invariants;
use mender::core::rules::RuleEngine;
use mender::core::strategy::StrategyId;
use mender::core::types::{LogLevel, Stage, TaskStatus, ValidationResult, WorkflowRun};
use mender::io::config::{FailurePolicy, Settings};
use mender::io::corrector::{Correction, CorrectionRequest, Corrector};
use mender::io::validator::{ValidateRequest, Validator};
use mender::test_support::{
    RecordingObserver, Scripted, ScriptedPlanner, ScriptedRunner, edge_case_output,
    incomplete_output, scripted_controller, workflow,
};
use mender::{CancellationToken, ErrorKind, WorkflowController, WorkflowExecutionError};

const THREE_STEPS: [&str; 3] = ["Parse sources", "Cross-reference", "Write report"];

fn assert_sound(run: &WorkflowRun, max_attempts: u32) {
    let errors = validate_run_invariants(run, max_attempts);
    assert!(errors.is_empty(), "invariant violations: {errors:?}");
}

fn logged_progress(run: &WorkflowRun) -> Vec<f64> {
    run.logs
        .iter()
        .filter_map(|entry| entry.metadata.get("progress").and_then(|v| v.as_f64()))
        .collect()
}

/// Scenario A: one step whose output passes every rule.
#[test]
fn single_passing_step_completes_without_corrections() {
    let runner = Arc::new(ScriptedRunner::new());
    let observer = Arc::new(RecordingObserver::default());
    let controller = scripted_controller(Settings::default(), &["Only step"], runner.clone())
        .with_observer(observer.clone());

    let run = controller
        .run(&workflow("Quick check", &[("pdf", "paper.pdf")]))
        .expect("run");

    assert_eq!(run.stage, Stage::Completed);
    assert!((run.progress - 1.0).abs() < f64::EPSILON);
    assert!(run.completed_at.is_some());
    assert_eq!(run.tasks.len(), 1);
    assert_eq!(run.tasks[0].status, TaskStatus::Completed);
    assert_eq!(run.corrections().count(), 0);
    assert!(run.validation_failure.is_none());
    assert_eq!(run.artifacts.len(), 3);
    assert!(run.artifacts.iter().all(|artifact| artifact.verified));
    assert_sound(&run, 3);

    let stages = observer.stages();
    assert_eq!(
        &stages[..4],
        &[
            Stage::Ingesting,
            Stage::Planning,
            Stage::Executing,
            Stage::Validating
        ]
    );
    assert_eq!(stages.last(), Some(&Stage::Completed));
}

/// Scenario B: the middle step returns an empty citation list once.
#[test]
fn edge_case_is_corrected_with_defensive_patch() {
    let runner = Arc::new(
        ScriptedRunner::new().with_step(2, vec![Scripted::Output(edge_case_output())]),
    );
    let controller = scripted_controller(Settings::default(), &THREE_STEPS, runner.clone());

    let run = controller
        .run(&workflow("Research synthesis", &[("pdf", "paper.pdf")]))
        .expect("run");

    assert_eq!(run.stage, Stage::Completed);
    let statuses: Vec<TaskStatus> = run.tasks.iter().map(|task| task.status).collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Completed,
            TaskStatus::Corrected,
            TaskStatus::Completed
        ]
    );

    let corrected = run.task("task_2").expect("task_2");
    assert!(corrected.correction_applied);
    assert_eq!(corrected.correction_attempts, 1);
    assert!(corrected.error.is_none());
    assert_eq!(corrected.corrections.len(), 1);
    let record = &corrected.corrections[0];
    assert_eq!(record.strategy, StrategyId::INJECT_DEFENSIVE_CODE);
    assert_eq!(record.attempt, 1);
    assert_eq!(record.task_id, "task_2");
    assert_eq!(run.correction.as_ref(), Some(record));

    let failure = run.validation_failure.as_ref().expect("validation failure");
    assert_eq!(failure.task_id, "task_2");
    assert!(
        failure
            .issues
            .iter()
            .any(|issue| issue.contains("edge case"))
    );

    // The patch is re-validated directly; the runner is not called again.
    assert_eq!(runner.calls_for("task_2"), 1);
    assert_sound(&run, 3);
}

/// Scenario C: the middle step never passes.
#[test]
fn exhausted_corrections_fail_the_run_fast() {
    let runner = Arc::new(
        ScriptedRunner::new().with_step(2, vec![Scripted::Output(incomplete_output())]),
    );
    let controller = scripted_controller(Settings::default(), &THREE_STEPS, runner.clone());

    let run = controller
        .run(&workflow("Research synthesis", &[("pdf", "paper.pdf")]))
        .expect("exhaustion is not an error");

    assert_eq!(run.stage, Stage::Failed);
    assert!(run.progress < 1.0);
    assert_eq!(run.tasks[0].status, TaskStatus::Completed);

    let failed = &run.tasks[1];
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.correction_attempts, 3);
    assert!(!failed.correction_applied);
    assert!(
        failed
            .error
            .as_deref()
            .is_some_and(|error| error.contains("missing required field: result"))
    );
    let attempts: Vec<u32> = failed.corrections.iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(
        failed
            .corrections
            .iter()
            .all(|c| c.strategy == StrategyId::USE_ALTERNATIVE_METHOD)
    );

    assert_eq!(run.tasks[2].status, TaskStatus::Pending);
    assert_eq!(runner.calls_for("task_2"), 4);
    assert_eq!(runner.calls_for("task_3"), 0);
    assert!(run.artifacts.is_empty());
    assert_sound(&run, 3);
}

#[test]
fn best_effort_continues_past_exhausted_task() {
    let settings = Settings {
        failure_policy: FailurePolicy::BestEffort,
        max_attempts: 2,
        ..Settings::default()
    };
    let runner = Arc::new(
        ScriptedRunner::new().with_step(2, vec![Scripted::Output(incomplete_output())]),
    );
    let controller = scripted_controller(settings, &THREE_STEPS, runner.clone());

    let run = controller
        .run(&workflow("Research synthesis", &[]))
        .expect("run");

    assert_eq!(run.stage, Stage::Completed);
    assert!((run.progress - 1.0).abs() < f64::EPSILON);
    assert_eq!(run.tasks[1].status, TaskStatus::Failed);
    assert_eq!(run.tasks[1].correction_attempts, 2);
    assert!(run.tasks[1].error.is_some());
    assert_eq!(run.tasks[2].status, TaskStatus::Completed);
    assert!(run.artifacts.iter().all(|artifact| !artifact.verified));
    assert!(
        run.logs
            .iter()
            .any(|entry| entry.level == LogLevel::Warning
                && entry.message.contains("Continuing past failed task_2"))
    );
    assert_sound(&run, 2);
}

#[test]
fn cancellation_during_second_step_stops_the_run() {
    let token = CancellationToken::new();
    let hook_token = token.clone();
    let runner = Arc::new(ScriptedRunner::new().on_execute(move |task| {
        if task.step_number == 2 {
            hook_token.cancel();
        }
    }));
    let controller = scripted_controller(Settings::default(), &THREE_STEPS, runner.clone())
        .with_cancellation(token);

    let err = controller
        .run(&workflow("Research synthesis", &[]))
        .expect_err("cancelled");

    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(err.is_cancelled());
    let run = err.run.expect("run snapshot");
    assert_eq!(run.stage, Stage::Failed);
    assert_eq!(run.tasks[0].status, TaskStatus::Completed);
    assert_eq!(run.tasks[1].status, TaskStatus::Failed);
    assert_eq!(run.tasks[1].error.as_deref(), Some("cancelled"));
    assert_eq!(run.tasks[2].status, TaskStatus::Pending);
    assert_eq!(runner.calls_for("task_3"), 0);

    let last = run.logs.last().expect("log");
    assert_eq!(last.level, LogLevel::Error);
    assert!(last.message.contains("cancelled"));
    assert_eq!(last.metadata["reason"], "cancelled");
    assert_sound(&run, 3);
}

#[test]
fn runner_timeout_is_reported_as_timeout() {
    let runner = Arc::new(ScriptedRunner::new().with_step(1, vec![Scripted::Timeout]));
    let controller = scripted_controller(Settings::default(), &THREE_STEPS, runner);

    let err = controller
        .run(&workflow("Research synthesis", &[]))
        .expect_err("timeout");

    assert_eq!(
        err.kind,
        ErrorKind::Timeout {
            stage: Stage::Executing,
            collaborator: "task runner"
        }
    );
    assert!(err.call_timeout().is_some());
    let run = err.run.expect("run snapshot");
    assert_eq!(run.stage, Stage::Failed);
    assert_eq!(run.tasks[0].status, TaskStatus::Failed);
    assert_eq!(run.tasks[1].status, TaskStatus::Pending);
    assert_eq!(run.logs.last().expect("log").metadata["reason"], "timeout");
    assert_sound(&run, 3);
}

/// Validator whose rule evaluation breaks on one step.
struct BrokenOnStep(u32);

impl Validator for BrokenOnStep {
    fn validate(&self, request: &ValidateRequest<'_>) -> Result<ValidationResult> {
        if request.task.step_number == self.0 {
            bail!("rule store unreachable");
        }
        Ok(RuleEngine::default().validate(request.task, request.output))
    }
}

struct UnreachableCorrector;

impl Corrector for UnreachableCorrector {
    fn apply(&self, _request: &CorrectionRequest<'_>) -> Result<Correction> {
        bail!("correction service unreachable");
    }
}

/// A collaborator `Err` ends the run `failed` with a `fault` log entry and
/// no task left running.
fn assert_fault(err: WorkflowExecutionError, stage: Stage, collaborator: &str) -> WorkflowRun {
    match &err.kind {
        ErrorKind::Collaborator {
            stage: got_stage,
            collaborator: got,
        } => {
            assert_eq!(*got_stage, stage);
            assert_eq!(*got, collaborator);
        }
        other => panic!("expected collaborator fault, got {other:?}"),
    }
    let run = *err.run.expect("run snapshot");
    assert_eq!(run.stage, Stage::Failed);
    assert!(run.tasks.iter().all(|t| t.status != TaskStatus::Running));
    let last = run.logs.last().expect("log");
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.metadata["reason"], "fault");
    assert_sound(&run, 3);
    run
}

#[test]
fn runner_fault_fails_the_run() {
    let runner = Arc::new(
        ScriptedRunner::new().with_step(2, vec![Scripted::Fault("worker crashed".to_string())]),
    );
    let controller = scripted_controller(Settings::default(), &THREE_STEPS, runner);

    let err = controller
        .run(&workflow("Research synthesis", &[]))
        .expect_err("fault");

    let run = assert_fault(err, Stage::Executing, "task runner");
    assert_eq!(run.tasks[0].status, TaskStatus::Completed);
    assert_eq!(run.tasks[1].status, TaskStatus::Failed);
    assert!(
        run.tasks[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("worker crashed"))
    );
    assert_eq!(run.tasks[2].status, TaskStatus::Pending);
}

#[test]
fn validator_fault_fails_the_run() {
    let controller = scripted_controller(Settings::default(), &THREE_STEPS, Arc::default())
        .with_validator(Arc::new(BrokenOnStep(1)));

    let err = controller
        .run(&workflow("Research synthesis", &[]))
        .expect_err("fault");

    let run = assert_fault(err, Stage::Validating, "validator");
    assert_eq!(run.tasks[0].status, TaskStatus::Failed);
    assert_eq!(run.tasks[1].status, TaskStatus::Pending);
    assert!(
        run.logs
            .last()
            .is_some_and(|entry| entry.message.contains("rule store unreachable"))
    );
}

#[test]
fn corrector_fault_fails_the_run() {
    let runner = Arc::new(
        ScriptedRunner::new().with_step(1, vec![Scripted::Output(edge_case_output())]),
    );
    let controller = scripted_controller(Settings::default(), &THREE_STEPS, runner)
        .with_corrector(Arc::new(UnreachableCorrector));

    let err = controller
        .run(&workflow("Research synthesis", &[]))
        .expect_err("fault");

    let run = assert_fault(err, Stage::Correcting, "corrector");
    let task = &run.tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.correction_attempts, 1);
    assert!(task.corrections.is_empty());
    assert!(run.validation_failure.is_some());
}

#[test]
fn planner_fault_fails_the_run() {
    let controller = scripted_controller(Settings::default(), &THREE_STEPS, Arc::default())
        .with_planner(Arc::new(ScriptedPlanner::failing("model unavailable")));

    let err = controller
        .run(&workflow("Research synthesis", &[]))
        .expect_err("fault");

    assert_eq!(
        err.kind,
        ErrorKind::Collaborator {
            stage: Stage::Planning,
            collaborator: "planner"
        }
    );
    let run = err.run.expect("run snapshot");
    assert_eq!(run.stage, Stage::Failed);
    assert!(run.tasks.is_empty());
    assert!(
        run.logs
            .last()
            .is_some_and(|entry| entry.message.contains("model unavailable"))
    );
}

#[test]
fn empty_plan_is_a_planner_fault() {
    let controller = scripted_controller(Settings::default(), &[], Arc::default());
    let err = controller
        .run(&workflow("Research synthesis", &[]))
        .expect_err("fault");
    assert!(matches!(
        err.kind,
        ErrorKind::Collaborator {
            collaborator: "planner",
            ..
        }
    ));
}

#[test]
fn reported_runner_failure_enters_correction_loop() {
    let runner = Arc::new(ScriptedRunner::new().with_step(
        1,
        vec![
            Scripted::Failure("rate limited".to_string()),
            Scripted::Output(mender::test_support::good_output()),
        ],
    ));
    let controller = scripted_controller(Settings::default(), &["Fetch"], runner.clone());

    let run = controller.run(&workflow("demo", &[])).expect("run");

    assert_eq!(run.stage, Stage::Completed);
    assert_eq!(run.tasks[0].status, TaskStatus::Corrected);
    let failure = run.validation_failure.expect("failure");
    assert_eq!(failure.issues, vec!["rate limited".to_string()]);
    assert_eq!(runner.calls_for("task_1"), 2);
}

#[test]
fn reruns_receive_original_inputs_and_correction_history() {
    let runner = Arc::new(
        ScriptedRunner::new().with_step(1, vec![Scripted::Output(incomplete_output())]),
    );
    let controller = scripted_controller(Settings::default(), &["Only step"], runner.clone());

    let _ = controller
        .run(&workflow(
            "demo",
            &[("pdf", "paper.pdf"), ("url", "https://example.com/a")],
        ))
        .expect("run");

    let calls = runner.calls();
    assert_eq!(calls.len(), 4);
    for call in &calls {
        assert_eq!(
            call.input_names,
            vec!["paper.pdf".to_string(), "https://example.com/a".to_string()]
        );
    }
    let seen: Vec<usize> = calls.iter().map(|call| call.corrections_seen).collect();
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[test]
fn steps_are_numbered_contiguously_and_progress_never_drops() {
    let steps = ["a", "b", "c", "d", "e", "f", "g"];
    let runner = Arc::new(
        ScriptedRunner::new().with_step(4, vec![Scripted::Output(edge_case_output())]),
    );
    let controller = scripted_controller(Settings::default(), &steps, runner);

    let run = controller.run(&workflow("demo", &[])).expect("run");

    let numbers: Vec<u32> = run.tasks.iter().map(|task| task.step_number).collect();
    assert_eq!(numbers, (1..=7).collect::<Vec<u32>>());
    let ids: Vec<&str> = run.tasks.iter().map(|task| task.id.as_str()).collect();
    assert_eq!(ids[3], "task_4");

    let progress = logged_progress(&run);
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!((progress.last().copied().unwrap_or_default() - 1.0).abs() < f64::EPSILON);
    assert_sound(&run, 3);
}

#[test]
fn concurrent_run_on_same_controller_is_busy() {
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let release_rx = Mutex::new(release_rx);
    let runner = Arc::new(ScriptedRunner::new().on_execute(move |_| {
        if let Ok(tx) = started_tx.lock() {
            let _ = tx.send(());
        }
        if let Ok(rx) = release_rx.lock() {
            let _ = rx.recv();
        }
    }));
    let controller: WorkflowController =
        scripted_controller(Settings::default(), &["Only step"], runner);
    let config = workflow("demo", &[]);

    thread::scope(|scope| {
        let first = scope.spawn(|| controller.run(&config));
        started_rx.recv().expect("first run started");

        let err = controller.run(&config).expect_err("busy");
        assert_eq!(err.kind, ErrorKind::Busy);
        assert!(err.run.is_none());

        release_tx.send(()).expect("release");
        let run = first.join().expect("join").expect("first run");
        assert_eq!(run.stage, Stage::Completed);
    });

    // The flag is released once the first run returns.
    drop(release_tx);
    let run = controller.run(&config).expect("second run");
    assert_eq!(run.stage, Stage::Completed);
}
