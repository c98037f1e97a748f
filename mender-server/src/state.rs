//! Shared application state for the workflow server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use mender::CancellationToken;
use mender::core::types::WorkflowRun;
use mender::io::config::Settings;
use mender::io::observer::RunObserver;
use mender::registry::RunRegistry;
use tokio::sync::broadcast;

/// Events broadcast to SSE clients.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A run changed stage or finished; carries the full snapshot.
    WorkflowUpdated(Arc<WorkflowRun>),
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Settings every run's controller is built from.
    pub settings: Arc<Settings>,
    pub registry: RunRegistry,
    /// Broadcast sender for run updates.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
    /// Cancellation tokens of runs still in flight, by workflow id.
    cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            settings: Arc::new(settings),
            registry: RunRegistry::new(),
            event_tx: Arc::new(event_tx),
            cancellations: Arc::default(),
        }
    }

    /// Register a fresh token for a run about to start. The run counts as in
    /// flight until the returned guard is dropped.
    pub fn register_run(&self, workflow_id: &str) -> InFlight {
        let token = CancellationToken::new();
        self.tokens()
            .insert(workflow_id.to_string(), token.clone());
        InFlight {
            cancellations: Arc::clone(&self.cancellations),
            workflow_id: workflow_id.to_string(),
            token,
        }
    }

    /// Number of runs currently executing.
    pub fn in_flight(&self) -> usize {
        self.tokens().len()
    }

    /// Request cancellation; false when the run is not in flight.
    pub fn cancel_run(&self, workflow_id: &str) -> bool {
        match self.tokens().get(workflow_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn observer(&self) -> BroadcastObserver {
        BroadcastObserver {
            registry: self.registry.clone(),
            event_tx: Arc::clone(&self.event_tx),
        }
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        lock(&self.cancellations)
    }
}

/// A registered run; deregisters its cancellation token on drop, however the
/// run ends.
pub struct InFlight {
    cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
    workflow_id: String,
    token: CancellationToken,
}

impl InFlight {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.cancellations).remove(&self.workflow_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Publishes every controller update to the registry and SSE subscribers.
pub struct BroadcastObserver {
    registry: RunRegistry,
    event_tx: Arc<broadcast::Sender<ChangeEvent>>,
}

impl RunObserver for BroadcastObserver {
    fn on_update(&self, run: &WorkflowRun) {
        self.registry.upsert(run);
        // No subscribers is fine; the registry still has the snapshot.
        let _ = self
            .event_tx
            .send(ChangeEvent::WorkflowUpdated(Arc::new(run.clone())));
    }
}
