use std::sync::Arc;

use axum::extract::ws::Message;
use liman_events::LicenseEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::ws::manager::WsManager;

/// Spawn a task that forwards every bus event to all connected sockets
/// as a JSON text frame.
///
/// The task ends when the event bus sender is dropped. A lagged receiver
/// (slow forwarding under a burst of events) skips the missed events and
/// keeps going.
pub fn start_event_forwarder(
    ws_manager: Arc<WsManager>,
    mut rx: broadcast::Receiver<LicenseEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to serialize event for WebSocket");
                            continue;
                        }
                    };
                    ws_manager.broadcast(Message::Text(text.into())).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "WebSocket forwarder lagged behind event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Event bus closed, WebSocket forwarder stopping");
    })
}
