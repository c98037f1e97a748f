//! Declarative correction-strategy selection.
//!
//! A [`StrategyTable`] is an ordered list of match rules evaluated against the
//! issue text of a failed validation. The first matching rule wins; when none
//! match, the table's fallback strategy is used. New failure categories are
//! added by pushing rows, never by changing the dispatch.

use std::borrow::Cow;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{Task, ValidationResult};

/// Identifier of a correction strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyId(Cow<'static, str>);

impl StrategyId {
    pub const INJECT_DEFENSIVE_CODE: StrategyId =
        StrategyId(Cow::Borrowed("inject_defensive_code"));
    pub const RETRY_WITH_MODIFIED_INPUT: StrategyId =
        StrategyId(Cow::Borrowed("retry_with_modified_input"));
    pub const USE_ALTERNATIVE_METHOD: StrategyId =
        StrategyId(Cow::Borrowed("use_alternative_method"));
    pub const DECOMPOSE_TASK: StrategyId = StrategyId(Cow::Borrowed("decompose_task"));

    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable description for the built-in strategies.
    pub fn description(&self) -> Option<&'static str> {
        match self.as_str() {
            "inject_defensive_code" => Some("Add error handling and edge case checks"),
            "retry_with_modified_input" => Some("Adjust parameters and retry"),
            "use_alternative_method" => Some("Switch to backup implementation"),
            "decompose_task" => Some("Break into simpler subtasks"),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    /// Case-insensitive substring; stored lowercased.
    Substring(String),
    Regex(Regex),
}

/// One row of a strategy table.
#[derive(Debug, Clone)]
pub struct StrategyRule {
    matcher: Matcher,
    strategy: StrategyId,
}

impl StrategyRule {
    /// Match when `needle` appears anywhere in the issue text, ignoring case.
    pub fn substring(needle: &str, strategy: StrategyId) -> Self {
        Self {
            matcher: Matcher::Substring(needle.to_lowercase()),
            strategy,
        }
    }

    /// Match with a regular expression against the raw issue text.
    pub fn regex(pattern: &str, strategy: StrategyId) -> Result<Self, regex::Error> {
        Ok(Self {
            matcher: Matcher::Regex(Regex::new(pattern)?),
            strategy,
        })
    }

    pub fn strategy(&self) -> &StrategyId {
        &self.strategy
    }

    fn matches(&self, raw: &str, lowered: &str) -> bool {
        match &self.matcher {
            Matcher::Substring(needle) => lowered.contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(raw),
        }
    }
}

/// Ordered, first-match-wins strategy table.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    rules: Vec<StrategyRule>,
    fallback: StrategyId,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            rules: vec![
                StrategyRule::substring("edge case", StrategyId::INJECT_DEFENSIVE_CODE),
                StrategyRule::substring("timeout", StrategyId::RETRY_WITH_MODIFIED_INPUT),
            ],
            fallback: StrategyId::USE_ALTERNATIVE_METHOD,
        }
    }
}

impl StrategyTable {
    /// An empty table that always resolves to `fallback`.
    pub fn new(fallback: StrategyId) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Append a rule with the lowest priority so far.
    pub fn push(&mut self, rule: StrategyRule) {
        self.rules.push(rule);
    }

    /// Place rules ahead of the existing ones, preserving their relative order.
    pub fn prepend(&mut self, rules: impl IntoIterator<Item = StrategyRule>) {
        let mut merged: Vec<StrategyRule> = rules.into_iter().collect();
        merged.append(&mut self.rules);
        self.rules = merged;
    }

    pub fn rules(&self) -> &[StrategyRule] {
        &self.rules
    }

    pub fn fallback(&self) -> &StrategyId {
        &self.fallback
    }

    /// Pick the strategy for a failed validation.
    ///
    /// Pure over `validation.issues`; the task is accepted so tables keyed on
    /// task shape can be added without changing callers.
    pub fn select(&self, _task: &Task, validation: &ValidationResult) -> StrategyId {
        let raw = validation.issues.join("; ");
        let lowered = raw.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&raw, &lowered))
            .map(|rule| rule.strategy.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;

    fn failed(issues: &[&str]) -> ValidationResult {
        ValidationResult::fail(
            "task_1",
            Severity::Medium,
            issues.iter().map(|issue| issue.to_string()).collect(),
        )
    }

    #[test]
    fn edge_case_selects_defensive_code() {
        let table = StrategyTable::default();
        let task = Task::new(1, "step");
        let strategy = table.select(&task, &failed(&["Unhandled EDGE CASE: empty list"]));
        assert_eq!(strategy, StrategyId::INJECT_DEFENSIVE_CODE);
    }

    #[test]
    fn timeout_selects_retry_with_modified_input() {
        let table = StrategyTable::default();
        let task = Task::new(1, "step");
        let strategy = table.select(&task, &failed(&["upstream Timeout while fetching"]));
        assert_eq!(strategy, StrategyId::RETRY_WITH_MODIFIED_INPUT);
    }

    #[test]
    fn first_match_wins_across_issues() {
        let table = StrategyTable::default();
        let task = Task::new(1, "step");
        let strategy = table.select(&task, &failed(&["timeout reached", "edge case: empty"]));
        assert_eq!(strategy, StrategyId::INJECT_DEFENSIVE_CODE);
    }

    #[test]
    fn unmatched_issues_fall_back() {
        let table = StrategyTable::default();
        let task = Task::new(1, "step");
        let strategy = table.select(&task, &failed(&["missing required field: data"]));
        assert_eq!(strategy, StrategyId::USE_ALTERNATIVE_METHOD);
    }

    #[test]
    fn prepended_rules_take_priority() {
        let mut table = StrategyTable::default();
        table.prepend([StrategyRule::regex(r"edge case: \w+ citation", StrategyId::DECOMPOSE_TASK)
            .expect("regex")]);
        let task = Task::new(1, "step");
        let strategy = table.select(&task, &failed(&["edge case: empty citation list"]));
        assert_eq!(strategy, StrategyId::DECOMPOSE_TASK);
    }

    #[test]
    fn builtin_strategies_have_descriptions() {
        assert!(StrategyId::INJECT_DEFENSIVE_CODE.description().is_some());
        assert!(StrategyId::new("custom").description().is_none());
        assert_eq!(
            serde_json::to_string(&StrategyId::DECOMPOSE_TASK).expect("json"),
            "\"decompose_task\""
        );
    }
}
