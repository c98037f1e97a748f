//! Shared data model for workflow runs.
//!
//! These types double as the canonical external representation of a run: the
//! serde field names below are the export format and must remain stable.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::strategy::StrategyId;

/// Opaque structured payload produced by a task runner.
pub type TaskOutput = Value;

/// Free-form metadata attached to log entries and ingested inputs.
pub type Metadata = Map<String, Value>;

/// Run-level phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Ingesting,
    Planning,
    Executing,
    Validating,
    Correcting,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Whether the stage machine permits moving from `self` to `next`.
    ///
    /// Any non-terminal stage may fail; terminal stages never move again.
    pub fn can_transition_to(self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Stage::Failed)
                | (Stage::Idle, Stage::Ingesting)
                | (Stage::Ingesting, Stage::Planning)
                | (Stage::Planning, Stage::Executing)
                | (Stage::Executing, Stage::Validating)
                | (Stage::Validating, Stage::Executing)
                | (Stage::Validating, Stage::Correcting)
                | (Stage::Correcting, Stage::Validating)
                | (Stage::Validating, Stage::Completed)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Ingesting => "ingesting",
            Stage::Planning => "planning",
            Stage::Executing => "executing",
            Stage::Validating => "validating",
            Stage::Correcting => "correcting",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Corrected,
}

impl TaskStatus {
    /// Whether the task machine permits moving from `self` to `next`.
    ///
    /// `Failed -> Running` is only legal as the start of a correction attempt;
    /// the controller is the sole caller that takes that edge.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Corrected)
                | (TaskStatus::Failed, TaskStatus::Running)
        )
    }

    /// Completed, or completed after correction.
    pub fn is_success(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Corrected)
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Corrected => "corrected",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How serious a validation issue is. Variant order is the severity order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// One input source named by a workflow config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    /// File path, URL, or other locator understood by the ingestor.
    pub name: String,
}

impl InputDescriptor {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Caller-supplied description of a workflow to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<InputDescriptor>,
}

/// One planned unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// 1-based position in the plan; defines execution order.
    pub step_number: u32,
    pub description: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Number of corrector invocations made for this task.
    pub correction_attempts: u32,
    pub correction_applied: bool,
    /// Every correction applied to this task, oldest first.
    #[serde(default)]
    pub corrections: Vec<CorrectionRecord>,
}

impl Task {
    pub fn new(step_number: u32, description: impl Into<String>) -> Self {
        Self {
            id: format!("task_{step_number}"),
            step_number,
            description: description.into(),
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            correction_attempts: 0,
            correction_applied: false,
            corrections: Vec::new(),
        }
    }
}

/// Outcome of checking one task's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub issues: Vec<String>,
    pub severity: Severity,
    pub task_id: String,
}

impl ValidationResult {
    pub fn pass(task_id: impl Into<String>) -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
            severity: Severity::None,
            task_id: task_id.into(),
        }
    }

    pub fn fail(task_id: impl Into<String>, severity: Severity, issues: Vec<String>) -> Self {
        Self {
            passed: false,
            issues,
            severity,
            task_id: task_id.into(),
        }
    }

    /// Issues joined into a single line for logs and error fields.
    pub fn summary(&self) -> String {
        self.issues.join("; ")
    }
}

/// One applied remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub action: String,
    pub strategy: StrategyId,
    /// Reported for observability only; never gates retries.
    pub confidence: f64,
    pub task_id: String,
    pub attempt: u32,
}

/// Immutable audit record in a run's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Verified output descriptor produced at workflow completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Size in bytes.
    pub size: u64,
    pub verified: bool,
    pub path: Option<String>,
    pub content_preview: Option<String>,
}

/// One workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub name: String,
    pub stage: Stage,
    pub progress: f64,
    pub tasks: Vec<Task>,
    pub logs: Vec<LogEntry>,
    pub artifacts: Vec<Artifact>,
    pub validation_failure: Option<ValidationResult>,
    pub correction: Option<CorrectionRecord>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            name: name.into(),
            stage: Stage::Idle,
            progress: 0.0,
            tasks: Vec::new(),
            logs: Vec::new(),
            artifacts: Vec::new(),
            validation_failure: None,
            correction: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// All correction records across tasks, in step order.
    pub fn corrections(&self) -> impl Iterator<Item = &CorrectionRecord> {
        self.tasks.iter().flat_map(|task| task.corrections.iter())
    }

    /// Tasks that ended permanently failed.
    pub fn failed_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
    }

    /// Serialize to the canonical JSON mapping.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Generate a new workflow id: `wf_<utc timestamp>_<short random suffix>`.
pub fn new_workflow_id() -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("wf_{stamp}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_machine_follows_documented_edges() {
        assert!(Stage::Idle.can_transition_to(Stage::Ingesting));
        assert!(Stage::Validating.can_transition_to(Stage::Correcting));
        assert!(Stage::Correcting.can_transition_to(Stage::Validating));
        assert!(Stage::Validating.can_transition_to(Stage::Completed));
        assert!(Stage::Planning.can_transition_to(Stage::Failed));

        assert!(!Stage::Idle.can_transition_to(Stage::Executing));
        assert!(!Stage::Executing.can_transition_to(Stage::Completed));
        assert!(!Stage::Correcting.can_transition_to(Stage::Executing));
        assert!(!Stage::Completed.can_transition_to(Stage::Failed));
        assert!(!Stage::Failed.can_transition_to(Stage::Idle));
    }

    #[test]
    fn task_status_only_regresses_for_correction() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Corrected));

        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Corrected.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn severity_is_totally_ordered() {
        let mut all = vec![
            Severity::Critical,
            Severity::None,
            Severity::High,
            Severity::Low,
            Severity::Medium,
        ];
        all.sort();
        assert_eq!(
            all,
            vec![
                Severity::None,
                Severity::Low,
                Severity::Medium,
                Severity::High,
                Severity::Critical
            ]
        );
    }

    #[test]
    fn input_descriptor_accepts_kind_or_type() {
        let from_type: InputDescriptor =
            serde_json::from_str(r#"{"type":"pdf","name":"a.pdf"}"#).expect("type");
        let from_kind: InputDescriptor =
            serde_json::from_str(r#"{"kind":"pdf","name":"a.pdf"}"#).expect("kind");
        assert_eq!(from_type, from_kind);
    }

    /// The export mapping keeps the documented field names.
    #[test]
    fn run_serializes_with_canonical_field_names() {
        let run = WorkflowRun::new("wf_1", "demo");
        let value = run.to_value().expect("serialize");
        let object = value.as_object().expect("object");
        for key in [
            "workflow_id",
            "name",
            "stage",
            "progress",
            "tasks",
            "logs",
            "artifacts",
            "validation_failure",
            "correction",
            "created_at",
            "completed_at",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object["stage"], "idle");
    }

    #[test]
    fn workflow_ids_have_prefix_and_differ() {
        let a = new_workflow_id();
        let b = new_workflow_id();
        assert!(a.starts_with("wf_"));
        assert_ne!(a, b);
    }
}
