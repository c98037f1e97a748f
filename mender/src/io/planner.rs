//! Planner abstraction.
//!
//! A [`Planner`] turns a workflow config and its ingested inputs into an
//! ordered list of step descriptions. Order defines step numbers. Tests use
//! scripted planners; the CLI defaults to [`TemplatePlanner`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::core::types::WorkflowConfig;
use crate::io::config::Settings;
use crate::io::ingest::IngestedInput;
use crate::io::process::run_json_command;

/// Parameters for a planner invocation.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub config: &'a WorkflowConfig,
    pub inputs: &'a [IngestedInput],
    pub timeout: Duration,
}

pub trait Planner: Send + Sync {
    /// Produce at least one step description.
    fn plan(&self, request: &PlanRequest<'_>) -> Result<Vec<String>>;
}

/// Keyword-driven plans chosen from the workflow name.
#[derive(Debug, Default, Clone)]
pub struct TemplatePlanner;

const RESEARCH_PLAN: [&str; 5] = [
    "Parse and extract content from all input sources",
    "Identify key themes and patterns across sources",
    "Cross-reference findings across all sources",
    "Generate synthesis report with citations",
    "Validate output completeness and citation accuracy",
];

const CODE_PLAN: [&str; 5] = [
    "Analyze code structure and dependencies",
    "Detect code smells and anti-patterns",
    "Evaluate security vulnerabilities",
    "Generate improvement recommendations",
    "Validate analysis completeness",
];

const VIDEO_PLAN: [&str; 5] = [
    "Extract video transcript and metadata",
    "Identify key concepts and topics",
    "Generate timeline of important moments",
    "Create summary and study guide",
    "Validate output quality",
];

const GENERIC_PLAN: [&str; 5] = [
    "Process and normalize input data",
    "Apply analysis to normalized inputs",
    "Generate insights and findings",
    "Create output artifacts",
    "Validate results quality",
];

impl TemplatePlanner {
    fn template_for(name: &str) -> &'static [&'static str] {
        let lowered = name.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));
        if has(&["research", "synthesis"]) {
            &RESEARCH_PLAN
        } else if has(&["code", "analysis"]) {
            &CODE_PLAN
        } else if has(&["video", "youtube"]) {
            &VIDEO_PLAN
        } else {
            &GENERIC_PLAN
        }
    }
}

impl Planner for TemplatePlanner {
    fn plan(&self, request: &PlanRequest<'_>) -> Result<Vec<String>> {
        let steps = Self::template_for(&request.config.name);
        debug!(steps = steps.len(), "selected plan template");
        Ok(steps.iter().map(|step| (*step).to_string()).collect())
    }
}

/// Planner backed by an external command.
///
/// Stdin: `{"name", "inputs"}`. Stdout: a JSON array of step strings, or an
/// object with a `steps` array.
#[derive(Debug, Clone)]
pub struct CommandPlanner {
    argv: Vec<String>,
    output_limit_bytes: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanResponse {
    Steps(Vec<String>),
    Wrapped { steps: Vec<String> },
}

impl CommandPlanner {
    pub fn new(argv: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            output_limit_bytes,
        }
    }
}

impl Planner for CommandPlanner {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn plan(&self, request: &PlanRequest<'_>) -> Result<Vec<String>> {
        info!(workflow = %request.config.name, "invoking planner command");
        let payload = json!({
            "name": request.config.name,
            "inputs": request.inputs,
        });
        let response = run_json_command(
            "planner",
            &self.argv,
            &payload,
            request.timeout,
            self.output_limit_bytes,
        )?;
        let steps = match serde_json::from_value(response).context("decode planner response")? {
            PlanResponse::Steps(steps) | PlanResponse::Wrapped { steps } => steps,
        };
        if steps.iter().any(|step| step.trim().is_empty()) {
            return Err(anyhow!("planner returned a blank step"));
        }
        Ok(steps)
    }
}

/// Pick the planner configured in `settings`.
pub fn planner_from_settings(settings: &Settings) -> Arc<dyn Planner> {
    match &settings.commands.planner {
        Some(argv) => Arc::new(CommandPlanner::new(argv.clone(), settings.output_limit_bytes)),
        None => Arc::new(TemplatePlanner),
    }
}
