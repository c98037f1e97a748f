//! Rule engine: evaluates one task output against an ordered set of named rules.
//!
//! Aggregation is deterministic:
//! - `passed` is true iff every rule passes.
//! - `severity` is the maximum severity among failing rules (`none` if all pass).
//! - `issues` concatenates failing rules' issues in registration order.
//!
//! Rules are pure functions of the output. Adding a rule never requires
//! touching existing ones.

use jsonschema::{Draft, Validator as SchemaValidator};
use serde_json::Value;

use crate::core::types::{Severity, Task, TaskOutput, ValidationResult};

/// Verdict of a single rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleVerdict {
    pub passed: bool,
    pub issues: Vec<String>,
    pub severity: Severity,
}

impl RuleVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
            severity: Severity::None,
        }
    }

    pub fn fail(severity: Severity, issues: Vec<String>) -> Self {
        Self {
            passed: false,
            issues,
            severity,
        }
    }
}

/// A named validation rule.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, output: &TaskOutput) -> RuleVerdict;
}

/// Adapter for closure-backed custom rules.
pub struct FnRule<F> {
    name: String,
    check: F,
}

impl<F> FnRule<F>
where
    F: Fn(&TaskOutput) -> RuleVerdict + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> Rule for FnRule<F>
where
    F: Fn(&TaskOutput) -> RuleVerdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, output: &TaskOutput) -> RuleVerdict {
        (self.check)(output)
    }
}

/// Output must be a JSON object.
pub struct FormatRule;

impl Rule for FormatRule {
    fn name(&self) -> &str {
        "format_check"
    }

    fn evaluate(&self, output: &TaskOutput) -> RuleVerdict {
        if output.is_object() {
            return RuleVerdict::pass();
        }
        RuleVerdict::fail(
            Severity::Low,
            vec![format!(
                "output must be a JSON object (got {})",
                json_kind(output)
            )],
        )
    }
}

/// Required top-level fields must be present and non-null.
pub struct RequiredFieldsRule {
    fields: Vec<String>,
}

impl RequiredFieldsRule {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl Default for RequiredFieldsRule {
    fn default() -> Self {
        Self::new(vec!["result".to_string(), "data".to_string()])
    }
}

impl Rule for RequiredFieldsRule {
    fn name(&self) -> &str {
        "completeness_check"
    }

    fn evaluate(&self, output: &TaskOutput) -> RuleVerdict {
        let missing: Vec<String> = self
            .fields
            .iter()
            .filter(|field| output.get(field.as_str()).is_none_or(Value::is_null))
            .map(|field| format!("missing required field: {field}"))
            .collect();
        if missing.is_empty() {
            RuleVerdict::pass()
        } else {
            RuleVerdict::fail(Severity::High, missing)
        }
    }
}

/// Outputs must carry a non-empty `citations` list.
pub struct CitationRule;

impl Rule for CitationRule {
    fn name(&self) -> &str {
        "citation_check"
    }

    fn evaluate(&self, output: &TaskOutput) -> RuleVerdict {
        match output.get("citations") {
            Some(Value::Array(items)) if !items.is_empty() => RuleVerdict::pass(),
            Some(Value::Array(_)) => RuleVerdict::fail(
                Severity::Medium,
                vec!["unhandled edge case: empty citation list".to_string()],
            ),
            Some(other) => RuleVerdict::fail(
                Severity::Medium,
                vec![format!(
                    "citations must be a list (got {})",
                    json_kind(other)
                )],
            ),
            None => RuleVerdict::fail(Severity::Medium, vec!["missing citations".to_string()]),
        }
    }
}

/// A reported `quality_score` must meet the threshold. Absent scores pass.
pub struct QualityScoreRule {
    threshold: f64,
}

impl QualityScoreRule {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for QualityScoreRule {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl Rule for QualityScoreRule {
    fn name(&self) -> &str {
        "quality_score"
    }

    fn evaluate(&self, output: &TaskOutput) -> RuleVerdict {
        let Some(raw) = output.get("quality_score") else {
            return RuleVerdict::pass();
        };
        let Some(score) = raw.as_f64() else {
            return RuleVerdict::fail(
                Severity::Medium,
                vec![format!(
                    "quality_score must be a number (got {})",
                    json_kind(raw)
                )],
            );
        };
        if score < self.threshold {
            return RuleVerdict::fail(
                Severity::Medium,
                vec![format!(
                    "quality score too low: {score:.2} < {:.2}",
                    self.threshold
                )],
            );
        }
        RuleVerdict::pass()
    }
}

/// Output must conform to a JSON Schema (Draft 2020-12).
pub struct SchemaRule {
    validator: SchemaValidator,
}

impl SchemaRule {
    pub fn new(schema: &Value) -> anyhow::Result<Self> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(schema)
            .map_err(|err| anyhow::anyhow!("compile output schema: {err}"))?;
        Ok(Self { validator })
    }
}

impl Rule for SchemaRule {
    fn name(&self) -> &str {
        "schema_check"
    }

    fn evaluate(&self, output: &TaskOutput) -> RuleVerdict {
        let issues: Vec<String> = self
            .validator
            .iter_errors(output)
            .map(|err| format!("schema violation: {err}"))
            .collect();
        if issues.is_empty() {
            RuleVerdict::pass()
        } else {
            RuleVerdict::fail(Severity::High, issues)
        }
    }
}

/// Ordered rule set.
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl Default for RuleEngine {
    /// The standard rule set with default field list and quality threshold.
    fn default() -> Self {
        Self::standard(RequiredFieldsRule::default(), QualityScoreRule::default())
    }
}

impl RuleEngine {
    /// An engine with no rules; every output passes.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Format, completeness, citation and quality rules, in that order.
    pub fn standard(required: RequiredFieldsRule, quality: QualityScoreRule) -> Self {
        Self::empty()
            .with_rule(FormatRule)
            .with_rule(required)
            .with_rule(CitationRule)
            .with_rule(quality)
    }

    /// Register a rule after the existing ones.
    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Evaluate every rule against `output` and aggregate.
    pub fn validate(&self, task: &Task, output: &TaskOutput) -> ValidationResult {
        let mut issues = Vec::new();
        let mut severity = Severity::None;
        let mut passed = true;

        for rule in &self.rules {
            let verdict = rule.evaluate(output);
            if verdict.passed {
                continue;
            }
            passed = false;
            severity = severity.max(verdict.severity);
            issues.extend(verdict.issues);
        }

        ValidationResult {
            passed,
            issues,
            severity,
            task_id: task.id.clone(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
