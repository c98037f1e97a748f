//! Deterministic, pure logic shared by the workflow controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod invariants;
pub mod progress;
pub mod rules;
pub mod strategy;
pub mod types;
