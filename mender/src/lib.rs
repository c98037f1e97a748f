//! Self-healing workflow runner.
//!
//! A [`controller::WorkflowController`] takes a named workflow with a list of
//! inputs, asks a planner for an ordered list of steps, executes each step,
//! validates every output against a declarative rule set, and applies bounded
//! automatic corrections before giving up on a step. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, rules, strategy
//!   selection, progress, invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: Collaborator seams and side-effecting adapters (processes,
//!   files, settings). Isolated to enable scripted collaborators in tests.
//!
//! [`controller`] coordinates the two; [`registry`] shares run snapshots
//! across runs for outer surfaces such as the HTTP server.

pub mod controller;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod registry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use controller::{CancellationToken, WorkflowController};
pub use error::{ErrorKind, WorkflowExecutionError};
