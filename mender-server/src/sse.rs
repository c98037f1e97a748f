//! Server-Sent Events stream of workflow updates.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::{AppState, ChangeEvent};

/// Event name and JSON body sent for a change.
fn payload(event: &ChangeEvent) -> Option<(&'static str, String)> {
    match event {
        ChangeEvent::WorkflowUpdated(run) => serde_json::to_string(run.as_ref())
            .ok()
            .map(|json| ("workflow_update", json)),
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    if let Some((name, json)) = payload(&change_event) {
                        yield Ok(Event::default().event(name).data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use mender::core::types::{Stage, WorkflowRun};

    #[test]
    fn workflow_update_carries_full_snapshot() {
        let mut run = WorkflowRun::new("wf_7", "demo");
        run.stage = Stage::Executing;
        run.progress = 0.3;

        let (name, json) =
            payload(&ChangeEvent::WorkflowUpdated(Arc::new(run))).expect("payload");
        assert_eq!(name, "workflow_update");

        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["workflow_id"], "wf_7");
        assert_eq!(value["stage"], "executing");
        assert_eq!(value["progress"], 0.3);
    }
}
