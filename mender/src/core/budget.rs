//! Per-call time budgets for collaborator invocations.

use std::time::{Duration, Instant};

use thiserror::Error;

/// A collaborator call exceeded its configured budget.
///
/// Adapters that enforce their own deadline (e.g. by killing a child process)
/// return this so the controller can classify the failure as a timeout.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{collaborator} timed out after {elapsed:?} (budget {timeout:?})")]
pub struct CallTimeout {
    pub collaborator: &'static str,
    pub timeout: Duration,
    pub elapsed: Duration,
}

/// Fail with [`CallTimeout`] if the call started at `started` overran `timeout`.
pub fn ensure_within(
    collaborator: &'static str,
    started: Instant,
    timeout: Duration,
) -> Result<(), CallTimeout> {
    let elapsed = started.elapsed();
    if elapsed > timeout {
        return Err(CallTimeout {
            collaborator,
            timeout,
            elapsed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrun_is_reported() {
        let Some(started) = Instant::now().checked_sub(Duration::from_secs(2)) else {
            return;
        };
        let err = ensure_within("runner", started, Duration::from_secs(1)).expect_err("overrun");
        assert_eq!(err.collaborator, "runner");
        assert!(err.elapsed >= Duration::from_secs(2));
    }

    #[test]
    fn call_within_budget_passes() {
        let started = Instant::now();
        assert!(ensure_within("planner", started, Duration::from_secs(60)).is_ok());
    }
}
