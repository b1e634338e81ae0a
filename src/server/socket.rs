//! WebSocket push channel for connected viewers.
//!
//! Each viewer holds one socket; the relay forwards every broadcast event as
//! a JSON text frame. Delivery is fire-and-forget: a viewer that is slow or
//! gone simply stops receiving, without affecting any other viewer.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{sink::SinkExt, stream::StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::server::webhook::PipelineNotification;
use crate::server::AppState;

/// Named channels a message can be published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketChannel {
    Pipeline,
}

/// Envelope written to the socket: channel name plus the minimal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketMessage {
    pub channel: SocketChannel,
    pub payload: PipelineNotification,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Drives one connected viewer until it disconnects.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.subscribe();

    info!("Viewer connected ({} connected)", state.viewer_count());

    // Forward broadcast events to this viewer. Joining here means the viewer
    // only ever sees events published after it connected.
    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to encode socket message: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("Socket send failed, viewer disconnected");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed events are not replayed; the viewer's own
                    // polling converges it back to current state.
                    warn!("Viewer lagging, {skipped} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Viewers send nothing meaningful; drain frames until the socket closes.
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    info!("Viewer disconnected");
}
