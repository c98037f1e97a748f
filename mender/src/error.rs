//! The single error type surfaced by [`crate::controller::WorkflowController::run`].

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::core::budget::CallTimeout;
use crate::core::types::{Stage, WorkflowRun};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a run could not finish normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The workflow config was rejected before the run started.
    InvalidConfig,
    /// A required collaborator was never bound.
    Unbound(&'static str),
    /// The controller is already driving another run.
    Busy,
    /// A collaborator returned an error.
    Collaborator {
        stage: Stage,
        collaborator: &'static str,
    },
    /// A collaborator exceeded its time budget.
    Timeout {
        stage: Stage,
        collaborator: &'static str,
    },
    Cancelled,
    /// The controller broke its own state machine.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidConfig => f.write_str("invalid workflow configuration"),
            ErrorKind::Unbound(name) => write!(f, "no {name} bound"),
            ErrorKind::Busy => f.write_str("controller is already running a workflow"),
            ErrorKind::Collaborator {
                stage,
                collaborator,
            } => write!(f, "{collaborator} failed during {stage}"),
            ErrorKind::Timeout {
                stage,
                collaborator,
            } => write!(f, "{collaborator} timed out during {stage}"),
            ErrorKind::Cancelled => f.write_str("workflow cancelled"),
            ErrorKind::Internal => f.write_str("internal controller fault"),
        }
    }
}

/// Error returned by a workflow run, carrying the final run snapshot when the
/// run had started.
#[derive(Debug, Error)]
#[error("workflow {workflow_id}: {kind}")]
pub struct WorkflowExecutionError {
    pub workflow_id: String,
    pub kind: ErrorKind,
    pub run: Option<Box<WorkflowRun>>,
    #[source]
    source: Option<BoxError>,
}

impl WorkflowExecutionError {
    pub fn new(workflow_id: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            kind,
            run: None,
            source: None,
        }
    }

    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_run(mut self, run: WorkflowRun) -> Self {
        self.run = Some(Box::new(run));
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }

    /// The typed timeout behind a [`ErrorKind::Timeout`], if any.
    pub fn call_timeout(&self) -> Option<&CallTimeout> {
        let mut current: Option<&(dyn StdError + 'static)> = self
            .source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static));
        while let Some(err) = current {
            if let Some(timeout) = err.downcast_ref::<CallTimeout>() {
                return Some(timeout);
            }
            current = err.source();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn display_names_workflow_and_kind() {
        let err = WorkflowExecutionError::new(
            "wf_1",
            ErrorKind::Collaborator {
                stage: Stage::Planning,
                collaborator: "planner",
            },
        );
        assert_eq!(err.to_string(), "workflow wf_1: planner failed during planning");
    }

    #[test]
    fn timeout_source_is_recoverable() {
        let timeout = CallTimeout {
            collaborator: "runner",
            timeout: Duration::from_secs(1),
            elapsed: Duration::from_secs(2),
        };
        let err = WorkflowExecutionError::new(
            "wf_1",
            ErrorKind::Timeout {
                stage: Stage::Executing,
                collaborator: "runner",
            },
        )
        .with_source(anyhow::Error::new(timeout.clone()).context("run task_1"));

        assert!(err.is_timeout());
        assert_eq!(err.call_timeout(), Some(&timeout));
        assert!(StdError::source(&err).is_some());
    }
}
