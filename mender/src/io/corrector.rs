//! Corrector seam and the built-in strategy corrector.
//!
//! A corrector turns a failed validation plus a selected strategy into a
//! [`CorrectionRecord`], optionally with a revised output. A revised output is
//! re-validated directly; without one the controller re-executes the task
//! runner with the original inputs.

use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::core::strategy::StrategyId;
use crate::core::types::{CorrectionRecord, Task, TaskOutput, ValidationResult};
use crate::io::ingest::IngestedInput;
use crate::io::task_runner::citations_for;

/// Parameters for a correction attempt.
#[derive(Debug, Clone)]
pub struct CorrectionRequest<'a> {
    pub task: &'a Task,
    pub validation: &'a ValidationResult,
    /// The failing output; `None` when the runner reported a failure instead.
    pub output: Option<&'a TaskOutput>,
    pub inputs: &'a [IngestedInput],
    pub strategy: &'a StrategyId,
    /// 1-based attempt number, already counted by the controller.
    pub attempt: u32,
    pub timeout: Duration,
}

/// What a corrector decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub record: CorrectionRecord,
    pub revised_output: Option<TaskOutput>,
}

pub trait Corrector: Send + Sync {
    fn apply(&self, request: &CorrectionRequest<'_>) -> Result<Correction>;
}

/// Applies the built-in strategy catalogue.
///
/// `inject_defensive_code` patches the failing output in place of a rerun:
/// required fields that are missing or null are filled and an empty citation
/// list is derived from the inputs. Every other strategy asks for a rerun.
#[derive(Debug, Clone)]
pub struct StrategyCorrector {
    required_fields: Vec<String>,
}

impl Default for StrategyCorrector {
    fn default() -> Self {
        Self::new(vec!["result".to_string(), "data".to_string()])
    }
}

impl StrategyCorrector {
    pub fn new(required_fields: Vec<String>) -> Self {
        Self { required_fields }
    }

    fn patch(&self, request: &CorrectionRequest<'_>) -> TaskOutput {
        let mut object = match request.output {
            Some(Value::Object(object)) => object.clone(),
            Some(other) => {
                let mut wrapped = Map::new();
                wrapped.insert("result".to_string(), other.clone());
                wrapped
            }
            None => Map::new(),
        };

        for field in &self.required_fields {
            if object.get(field).is_none_or(Value::is_null) {
                object.insert(
                    field.clone(),
                    json!(format!("{field} unavailable for {}", request.task.id)),
                );
            }
        }

        let cited = object
            .get("citations")
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty());
        if !cited {
            object.insert(
                "citations".to_string(),
                json!(citations_for(request.task, request.inputs)),
            );
        }
        Value::Object(object)
    }
}

/// Reported confidence per strategy; observability only.
fn confidence_for(strategy: &StrategyId) -> f64 {
    match strategy.as_str() {
        "inject_defensive_code" => 0.95,
        "retry_with_modified_input" => 0.85,
        "use_alternative_method" => 0.75,
        "decompose_task" => 0.7,
        _ => 0.5,
    }
}

impl Corrector for StrategyCorrector {
    fn apply(&self, request: &CorrectionRequest<'_>) -> Result<Correction> {
        let strategy = request.strategy;
        let action = match strategy.description() {
            Some(description) => description.to_string(),
            None => format!("Apply {strategy}"),
        };
        let revised_output =
            (*strategy == StrategyId::INJECT_DEFENSIVE_CODE).then(|| self.patch(request));
        debug!(
            task_id = %request.task.id,
            %strategy,
            attempt = request.attempt,
            patched = revised_output.is_some(),
            "correction prepared"
        );
        Ok(Correction {
            record: CorrectionRecord {
                action,
                strategy: strategy.clone(),
                confidence: confidence_for(strategy),
                task_id: request.task.id.clone(),
                attempt: request.attempt,
            },
            revised_output,
        })
    }
}
