//! Validator seam and construction of the configured rule engine.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::core::rules::{QualityScoreRule, RequiredFieldsRule, RuleEngine, SchemaRule};
use crate::core::types::{Task, TaskOutput, ValidationResult};
use crate::io::config::ValidationSettings;

/// Parameters for a validation call.
#[derive(Debug, Clone)]
pub struct ValidateRequest<'a> {
    pub task: &'a Task,
    pub output: &'a TaskOutput,
    pub timeout: Duration,
}

/// Produces a fresh [`ValidationResult`] for one output.
///
/// `Err` is reserved for faults in the validator itself; a failing output is
/// reported through `ValidationResult::passed`.
pub trait Validator: Send + Sync {
    fn validate(&self, request: &ValidateRequest<'_>) -> Result<ValidationResult>;
}

impl Validator for RuleEngine {
    fn validate(&self, request: &ValidateRequest<'_>) -> Result<ValidationResult> {
        Ok(RuleEngine::validate(self, request.task, request.output))
    }
}

/// Standard rules with configured fields and threshold, plus the schema rule
/// when an output schema is configured.
pub fn build_rule_engine(settings: &ValidationSettings) -> Result<RuleEngine> {
    let engine = RuleEngine::standard(
        RequiredFieldsRule::new(settings.required_fields.clone()),
        QualityScoreRule::new(settings.quality_threshold),
    );
    let Some(path) = &settings.output_schema else {
        return Ok(engine);
    };
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let schema: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let rule = SchemaRule::new(&schema).with_context(|| format!("load {}", path.display()))?;
    Ok(engine.with_rule(rule))
}
