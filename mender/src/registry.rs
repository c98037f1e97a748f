//! Run-id-keyed store of run snapshots shared across controllers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::core::types::WorkflowRun;
use crate::io::observer::RunObserver;

/// Cheap-to-clone handle; all clones see the same runs.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<String, WorkflowRun>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the snapshot for `run.workflow_id`.
    pub fn upsert(&self, run: &WorkflowRun) {
        let mut runs = match self.runs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        runs.insert(run.workflow_id.clone(), run.clone());
    }

    pub fn get(&self, workflow_id: &str) -> Option<WorkflowRun> {
        let runs = match self.runs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        runs.get(workflow_id).cloned()
    }

    /// All runs, oldest first.
    pub fn list(&self) -> Vec<WorkflowRun> {
        let runs = match self.runs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut all: Vec<WorkflowRun> = runs.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });
        all
    }

    /// Number of runs known, finished or not.
    pub fn count(&self) -> usize {
        match self.runs.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl RunObserver for RunRegistry {
    fn on_update(&self, run: &WorkflowRun) {
        self.upsert(run);
    }
}
