//! Collaborator seams and side-effecting helpers for the controller.

pub mod artifacts;
pub mod config;
pub mod corrector;
pub mod ingest;
pub mod observer;
pub mod planner;
pub mod process;
pub mod snapshot;
pub mod task_runner;
pub mod validator;
pub mod workflow_file;
