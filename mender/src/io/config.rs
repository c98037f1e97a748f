//! Controller settings stored in `mender.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::strategy::{StrategyId, StrategyRule, StrategyTable};

/// What happens to the run when a task exhausts its correction attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run; it ends `failed` and remaining tasks stay `pending`.
    #[default]
    FailFast,
    /// Flag the task as failed and continue with the next one.
    BestEffort,
}

/// Controller settings (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Ceiling on corrector invocations per task.
    pub max_attempts: u32,

    pub failure_policy: FailurePolicy,

    /// Truncate command collaborator stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub timeouts: Timeouts,
    pub validation: ValidationSettings,
    pub correction: CorrectionSettings,
    pub commands: CommandSettings,
    pub artifacts: ArtifactSettings,
}

/// Per-collaborator call budgets in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    pub ingest_secs: u64,
    pub planner_secs: u64,
    pub runner_secs: u64,
    pub validator_secs: u64,
    pub corrector_secs: u64,
    pub artifacts_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationSettings {
    /// Top-level fields every task output must carry.
    pub required_fields: Vec<String>,
    /// Minimum accepted `quality_score` when an output reports one.
    pub quality_threshold: f64,
    /// Optional JSON Schema every task output must satisfy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorrectionSettings {
    /// Extra strategy rows, consulted before the built-in ones.
    pub strategies: Vec<StrategyRow>,
}

/// One configured strategy-table row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyRow {
    pub pattern: String,
    pub strategy: String,
    /// Treat `pattern` as a regular expression instead of a substring.
    #[serde(default)]
    pub regex: bool,
}

/// External commands backing the planner and task runner.
///
/// When unset, the built-in template planner and local runner are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planner: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactSettings {
    /// Directory to write report artifacts into; in-memory only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            failure_policy: FailurePolicy::default(),
            output_limit_bytes: 100_000,
            timeouts: Timeouts::default(),
            validation: ValidationSettings::default(),
            correction: CorrectionSettings::default(),
            commands: CommandSettings::default(),
            artifacts: ArtifactSettings::default(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ingest_secs: 60,
            planner_secs: 5 * 60,
            runner_secs: 30 * 60,
            validator_secs: 60,
            corrector_secs: 5 * 60,
            artifacts_secs: 2 * 60,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            required_fields: vec!["result".to_string(), "data".to_string()],
            quality_threshold: 0.7,
            output_schema: None,
        }
    }
}

impl Timeouts {
    pub fn ingest(&self) -> Duration {
        Duration::from_secs(self.ingest_secs)
    }

    pub fn planner(&self) -> Duration {
        Duration::from_secs(self.planner_secs)
    }

    pub fn runner(&self) -> Duration {
        Duration::from_secs(self.runner_secs)
    }

    pub fn validator(&self) -> Duration {
        Duration::from_secs(self.validator_secs)
    }

    pub fn corrector(&self) -> Duration {
        Duration::from_secs(self.corrector_secs)
    }

    pub fn artifacts(&self) -> Duration {
        Duration::from_secs(self.artifacts_secs)
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        let t = &self.timeouts;
        for (name, secs) in [
            ("ingest_secs", t.ingest_secs),
            ("planner_secs", t.planner_secs),
            ("runner_secs", t.runner_secs),
            ("validator_secs", t.validator_secs),
            ("corrector_secs", t.corrector_secs),
            ("artifacts_secs", t.artifacts_secs),
        ] {
            if secs == 0 {
                return Err(anyhow!("timeouts.{name} must be > 0"));
            }
        }
        if !(0.0..=1.0).contains(&self.validation.quality_threshold) {
            return Err(anyhow!("validation.quality_threshold must be within [0, 1]"));
        }
        for (name, argv) in [
            ("planner", &self.commands.planner),
            ("runner", &self.commands.runner),
        ] {
            if let Some(argv) = argv
                && argv.first().is_none_or(|program| program.trim().is_empty())
            {
                return Err(anyhow!("commands.{name} must be a non-empty array"));
            }
        }
        self.strategy_table()?;
        Ok(())
    }

    /// The built-in strategy table with configured rows placed ahead of it.
    pub fn strategy_table(&self) -> Result<StrategyTable> {
        let mut rows = Vec::with_capacity(self.correction.strategies.len());
        for row in &self.correction.strategies {
            if row.pattern.is_empty() || row.strategy.trim().is_empty() {
                return Err(anyhow!(
                    "correction.strategies entries need a pattern and a strategy"
                ));
            }
            let strategy = StrategyId::new(row.strategy.trim());
            let rule = if row.regex {
                StrategyRule::regex(&row.pattern, strategy)
                    .with_context(|| format!("compile strategy pattern {:?}", row.pattern))?
            } else {
                StrategyRule::substring(&row.pattern, strategy)
            };
            rows.push(rule);
        }
        let mut table = StrategyTable::default();
        table.prepend(rows);
        Ok(table)
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Severity, Task, ValidationResult};

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("mender.toml");
        let mut settings = Settings::default();
        settings.failure_policy = FailurePolicy::BestEffort;
        settings.commands.runner = Some(vec!["./runner.sh".to_string()]);
        write_settings(&path, &settings).expect("write");
        let loaded = load_settings(&path).expect("load");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("mender.toml");
        fs::write(
            &path,
            "max_attempts = 5\nfailure_policy = \"best_effort\"\n[timeouts]\nrunner_secs = 10\n",
        )
        .expect("write");
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.failure_policy, FailurePolicy::BestEffort);
        assert_eq!(settings.timeouts.runner(), Duration::from_secs(10));
        assert_eq!(settings.timeouts.planner_secs, 300);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let settings = Settings {
            max_attempts: 0,
            ..Settings::default()
        };
        let err = settings.validate().expect_err("invalid");
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let mut settings = Settings::default();
        settings.commands.planner = Some(Vec::new());
        let err = settings.validate().expect_err("invalid");
        assert!(err.to_string().contains("commands.planner"));
    }

    #[test]
    fn configured_strategies_take_priority() {
        let mut settings = Settings::default();
        settings.correction.strategies.push(StrategyRow {
            pattern: "missing required field".to_string(),
            strategy: "decompose_task".to_string(),
            regex: false,
        });
        let table = settings.strategy_table().expect("table");
        let failed = ValidationResult::fail(
            "task_1",
            Severity::High,
            vec!["missing required field: data".to_string()],
        );
        assert_eq!(
            table.select(&Task::new(1, "step"), &failed),
            StrategyId::DECOMPOSE_TASK
        );
    }

    #[test]
    fn bad_strategy_regex_is_rejected() {
        let mut settings = Settings::default();
        settings.correction.strategies.push(StrategyRow {
            pattern: "(unclosed".to_string(),
            strategy: "decompose_task".to_string(),
            regex: true,
        });
        assert!(settings.validate().is_err());
    }
}
