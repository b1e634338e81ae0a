//! Webhook relay server.
//!
//! Accepts GitLab pipeline webhooks, projects them to the minimal viewer
//! event and fans them out to every connected WebSocket viewer. Anything that
//! is not webhook traffic falls through to static asset serving. The relay
//! keeps no event history: a viewer that is disconnected when a hook arrives
//! relies on its own polling to catch up.

mod socket;
mod webhook;

pub use socket::{SocketChannel, SocketMessage};
pub use webhook::{PipelineHook, PipelineNotification};

use std::path::Path;

use axum::routing::{get, post};
use axum::Router;
use log::info;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;

use crate::error::Result;

/// Capacity of the broadcast channel; a viewer further behind than this
/// starts losing events (and is told so, see [`socket`]).
const CHANNEL_CAPACITY: usize = 64;

/// Shared relay state: the process-wide broadcast channel.
#[derive(Clone)]
pub struct AppState {
    tx: broadcast::Sender<SocketMessage>,
}

impl AppState {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Number of currently connected viewer channels.
    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribes a viewer channel; events published before this call are
    /// never delivered to it.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketMessage> {
        self.tx.subscribe()
    }

    /// Publishes an event to every currently connected viewer.
    pub fn publish(&self, channel: SocketChannel, payload: PipelineNotification) {
        // Zero receivers is not a failure; events are fire-and-forget.
        let _ = self.tx.send(SocketMessage { channel, payload });
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the relay router.
///
/// `POST /webhooks[/...]` carrying the pipeline event header goes to the
/// webhook handler; every other request is served from `asset_root`.
pub fn create_router(state: AppState, asset_root: &Path) -> Router {
    Router::new()
        .route("/ws", get(socket::ws_handler))
        .route("/webhooks", post(webhook::ingress))
        .route("/webhooks/{*rest}", post(webhook::ingress))
        .fallback_service(ServeDir::new(asset_root))
        .with_state(state)
}

/// Runs the relay until the process is stopped.
pub async fn run_server(port: u16, asset_root: &Path) -> Result<()> {
    let state = AppState::new();
    let app = create_router(state, asset_root);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Relay listening on *:{port}, serving assets from {}", asset_root.display());

    axum::serve(listener, app).await?;
    Ok(())
}
