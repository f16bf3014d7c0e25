// ABOUTME: Push channel: websocket endpoint that registers clients with the broadcast registry.
// ABOUTME: Sends a full-state snapshot on connect and answers keepalive pings.

use crate::server::AppState;
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use trishul_core::error::SinkError;
use trishul_core::PushSink;

/// Close code sent to sockets that fail authentication.
pub const UNAUTHORIZED_CLOSE: u16 = 4001;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// Upgrade `/api/ws`. Rejected tokens still complete the upgrade, since a
/// 4001 close code can only be sent on an open socket; they are never registered.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let authorised = params
        .token
        .as_deref()
        .is_some_and(|token| state.sessions.validate(token));

    ws.on_upgrade(move |socket| async move {
        if authorised {
            handle_socket(socket, state).await;
        } else {
            reject(socket).await;
        }
    })
}

async fn reject(mut socket: WebSocket) {
    tracing::info!("Rejecting push connection with invalid token");
    let frame = CloseFrame {
        code: UNAUTHORIZED_CLOSE,
        reason: "Unauthorized".into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Registry entry for one socket. Messages go through the socket's writer
/// task; once that task is gone every send fails.
struct WsSink {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl PushSink for WsSink {
    async fn send(&self, payload: &str) -> Result<(), SinkError> {
        self.tx.send(payload.to_string()).map_err(|_| SinkError)
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let id = state
        .registry
        .register(Arc::new(WsSink { tx: tx.clone() }))
        .await;
    let snapshot = state.control.full_state().await.encode();
    state.registry.send_one(id, &snapshot).await;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) if text.trim() == "ping" => {
                if tx.send("pong".to_string()).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.unregister(id).await;
    writer.abort();
    tracing::debug!(connection = %id, "Push connection closed");
}
