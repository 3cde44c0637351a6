//! WebSocket endpoint streaming broker events to permission UIs.
//!
//! Each connection subscribes to the [`crate::events::EventBus`] and
//! forwards every event as one JSON text frame. Inbound frames are
//! ignored except close.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

/// GET /ws/events — upgrade to WebSocket.
pub async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut events = state.events.subscribe();
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!("event subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // pings and stray frames
                Some(Err(_)) => break,
            },
        }
    }

    tracing::debug!("event subscriber disconnected");
}
