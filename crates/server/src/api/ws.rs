//! WebSocket stream of cycle snapshots for dashboards.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use dropwatch_core::{CycleSnapshot, TimerState};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_MESSAGES_SENT};
use crate::state::AppState;

/// WebSocket message sent to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage<'a> {
    /// Sent once on connect so a client can show the countdown before the
    /// next snapshot arrives.
    Timer(TimerState),
    /// Full state after a cycle.
    Snapshot(&'a CycleSnapshot),
}

impl WsMessage<'_> {
    fn kind(&self) -> &'static str {
        match self {
            WsMessage::Timer(_) => "timer",
            WsMessage::Snapshot(_) => "snapshot",
        }
    }

    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                error!("Failed to serialize WsMessage: {}", e);
                None
            }
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the timer so no snapshot slips between them.
    let mut subscription = state.orchestrator().subscribe();
    let timer = WsMessage::Timer(state.orchestrator().timer());

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!(subscriber = subscription.id(), "WebSocket client connected");

    let send_task = tokio::spawn(async move {
        if let Some(json) = timer.to_json() {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
            WS_MESSAGES_SENT.with_label_values(&[timer.kind()]).inc();
        }

        while let Some(snapshot) = subscription.recv().await {
            let msg = WsMessage::Snapshot(&snapshot);
            let Some(json) = msg.to_json() else {
                continue;
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
            WS_MESSAGES_SENT.with_label_values(&[msg.kind()]).inc();
        }
    });

    // Clients only send close/ping; anything else is logged and ignored.
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Received text message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
