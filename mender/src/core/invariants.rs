//! Structural invariants of a workflow run.
//!
//! Used by `mender verify` on exported snapshots and by tests after every
//! scenario. Returns human-readable violations; empty means the run is sound.

use std::collections::HashSet;

use crate::core::types::{Stage, TaskStatus, WorkflowRun};

/// Check run invariants:
/// - Step numbers are exactly `1..=N` in order, ids unique
/// - `0 <= progress <= 1`, and `progress == 1` iff the run completed
/// - Log timestamps and logged progress never decrease
/// - No task is still running once the run is terminal
/// - `correction_attempts <= max_attempts`
/// - `correction_applied` iff the task ended corrected
pub fn validate_run_invariants(run: &WorkflowRun, max_attempts: u32) -> Vec<String> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for (index, task) in run.tasks.iter().enumerate() {
        let expected = index as u32 + 1;
        if task.step_number != expected {
            errors.push(format!(
                "{}: step_number {} but position {}",
                task.id, task.step_number, expected
            ));
        }
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
        if task.correction_attempts > max_attempts {
            errors.push(format!(
                "{}: correction_attempts {} exceeds max_attempts {}",
                task.id, task.correction_attempts, max_attempts
            ));
        }
        let corrected = task.status == TaskStatus::Corrected;
        if task.correction_applied != corrected {
            errors.push(format!(
                "{}: correction_applied={} with status {}",
                task.id, task.correction_applied, task.status
            ));
        }
        if run.stage.is_terminal() && task.status == TaskStatus::Running {
            errors.push(format!("{}: still running in {} run", task.id, run.stage));
        }
    }

    if !(0.0..=1.0).contains(&run.progress) {
        errors.push(format!("progress {} outside [0, 1]", run.progress));
    }
    let complete = (run.progress - 1.0).abs() < f64::EPSILON;
    if complete != (run.stage == Stage::Completed) {
        errors.push(format!(
            "progress {} inconsistent with stage {}",
            run.progress, run.stage
        ));
    }

    for pair in run.logs.windows(2) {
        if pair[1].timestamp < pair[0].timestamp {
            errors.push(format!("log '{}' is older than its predecessor", pair[1].message));
        }
    }

    let logged: Vec<f64> = run
        .logs
        .iter()
        .filter_map(|entry| entry.metadata.get("progress").and_then(|value| value.as_f64()))
        .collect();
    if logged.windows(2).any(|pair| pair[1] < pair[0]) {
        errors.push("logged progress decreases".to_string());
    }

    errors
}
