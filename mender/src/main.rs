//! Self-healing workflow runner CLI.
//!
//! Runs a workflow config (`workflow.json`) through the controller with the
//! built-in or command-backed collaborators named in `mender.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;

use mender::core::invariants::validate_run_invariants;
use mender::core::types::{Stage, Task, WorkflowRun};
use mender::exit_codes;
use mender::io::config::{FailurePolicy, Settings, load_settings, write_settings};
use mender::io::ingest::{IngestRequest, Ingestor, LocatorIngestor};
use mender::io::planner::{PlanRequest, planner_from_settings};
use mender::io::snapshot::{load_run_snapshot, write_run_snapshot};
use mender::io::validator::build_rule_engine;
use mender::io::workflow_file::load_workflow_config;
use mender::{ErrorKind, WorkflowController, logging};

const DEFAULT_SETTINGS: &str = "mender.toml";

#[derive(Parser)]
#[command(name = "mender", version, about = "Self-healing workflow runner")]
struct Cli {
    /// Settings file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a workflow to completion and report the final run.
    Run {
        workflow: PathBuf,
        /// Write the final run snapshot here instead of printing it.
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Continue past tasks that exhaust their correction attempts.
        #[arg(long)]
        best_effort: bool,
    },
    /// Print the plan a workflow would run, without executing it.
    Plan { workflow: PathBuf },
    /// Validate a saved task output against the configured rules.
    Check { output: PathBuf },
    /// Check a run snapshot against the run invariants.
    Verify { run: PathBuf },
    /// Write a settings file populated with defaults.
    InitSettings {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            workflow,
            out,
            best_effort,
        } => cmd_run(&cli.settings, &workflow, out.as_deref(), best_effort),
        Command::Plan { workflow } => cmd_plan(&cli.settings, &workflow),
        Command::Check { output } => cmd_check(&cli.settings, &output),
        Command::Verify { run } => cmd_verify(&cli.settings, &run),
        Command::InitSettings { force } => cmd_init_settings(&cli.settings, force),
    }
}

fn cmd_run(
    settings_path: &Path,
    workflow: &Path,
    out: Option<&Path>,
    best_effort: bool,
) -> Result<i32> {
    let mut settings = load_settings(settings_path)?;
    if best_effort {
        settings.failure_policy = FailurePolicy::BestEffort;
    }
    let config = load_workflow_config(workflow)?;
    let controller = WorkflowController::from_settings(settings)?;

    let (run, code) = match controller.run(&config) {
        Ok(run) => {
            let code = if run.stage == Stage::Completed {
                exit_codes::OK
            } else {
                exit_codes::FAILED
            };
            (run, code)
        }
        Err(mut err) => {
            let code = match err.kind {
                ErrorKind::Cancelled => exit_codes::CANCELLED,
                _ => exit_codes::INVALID,
            };
            let run = err.run.take();
            eprintln!("{:#}", anyhow::Error::new(err));
            match run {
                Some(run) => (*run, code),
                None => return Ok(code),
            }
        }
    };

    report_run(&run, out)?;
    Ok(code)
}

fn report_run(run: &WorkflowRun, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            write_run_snapshot(path, run)?;
            for task in &run.tasks {
                println!("{} {} {}", task.id, task.status, task.description);
            }
            println!("{} {}", run.workflow_id, run.stage);
        }
        None => {
            let payload = serde_json::to_string_pretty(run).context("serialize run")?;
            println!("{payload}");
        }
    }
    Ok(())
}

fn cmd_plan(settings_path: &Path, workflow: &Path) -> Result<i32> {
    let settings = load_settings(settings_path)?;
    let config = load_workflow_config(workflow)?;
    let ingestor = LocatorIngestor;
    let inputs = config
        .inputs
        .iter()
        .map(|input| {
            ingestor.process(&IngestRequest {
                input,
                timeout: settings.timeouts.ingest(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let steps = planner_from_settings(&settings).plan(&PlanRequest {
        config: &config,
        inputs: &inputs,
        timeout: settings.timeouts.planner(),
    })?;
    if steps.is_empty() {
        bail!("planner returned an empty plan");
    }
    for (index, step) in steps.iter().enumerate() {
        println!("{}. {step}", index + 1);
    }
    Ok(exit_codes::OK)
}

fn cmd_check(settings_path: &Path, output_path: &Path) -> Result<i32> {
    let settings = load_settings(settings_path)?;
    let engine = build_rule_engine(&settings.validation)?;
    let raw = std::fs::read_to_string(output_path)
        .with_context(|| format!("read {}", output_path.display()))?;
    let output: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", output_path.display()))?;

    let task = Task::new(1, output_path.display().to_string());
    let result = engine.validate(&task, &output);
    if result.passed {
        println!("passed");
        return Ok(exit_codes::OK);
    }
    println!("failed ({})", result.severity.label());
    for issue in &result.issues {
        println!("- {issue}");
    }
    Ok(exit_codes::FAILED)
}

fn cmd_verify(settings_path: &Path, run_path: &Path) -> Result<i32> {
    let settings = load_settings(settings_path)?;
    let run = load_run_snapshot(run_path)?;
    let errors = validate_run_invariants(&run, settings.max_attempts);
    if errors.is_empty() {
        println!("ok");
        return Ok(exit_codes::OK);
    }
    for error in &errors {
        println!("- {error}");
    }
    Ok(exit_codes::FAILED)
}

fn cmd_init_settings(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_settings(path, &Settings::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_flags() {
        let cli = Cli::parse_from([
            "mender",
            "run",
            "workflow.json",
            "--out",
            "run.json",
            "--best-effort",
        ]);
        match cli.command {
            Command::Run {
                workflow,
                out,
                best_effort,
            } => {
                assert_eq!(workflow, PathBuf::from("workflow.json"));
                assert_eq!(out, Some(PathBuf::from("run.json")));
                assert!(best_effort);
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.settings, PathBuf::from(DEFAULT_SETTINGS));
    }

    #[test]
    fn parse_init_settings_force() {
        let cli = Cli::parse_from(["mender", "--settings", "x.toml", "init-settings", "--force"]);
        assert!(matches!(cli.command, Command::InitSettings { force: true }));
        assert_eq!(cli.settings, PathBuf::from("x.toml"));
    }
}
