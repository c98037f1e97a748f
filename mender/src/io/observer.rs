//! Run-update notification.

use crate::core::types::WorkflowRun;

/// Receives the full run snapshot on every stage transition and on completion.
///
/// Called synchronously from the controller; implementations should return
/// quickly and must not block on the run they observe.
pub trait RunObserver: Send + Sync {
    fn on_update(&self, run: &WorkflowRun);
}

impl<F> RunObserver for F
where
    F: Fn(&WorkflowRun) + Send + Sync,
{
    fn on_update(&self, run: &WorkflowRun) {
        self(run);
    }
}
