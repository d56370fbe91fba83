// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downstream WebSocket handler for relay subscribers.
//!
//! Subscribers only receive. Anything they send is read and discarded so
//! that close frames and disconnects are still noticed.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{SinkExt, StreamExt};

use crate::broadcast::Payload;
use crate::registry::Subscriber;
use crate::state::RelayState;
use crate::transport::http;

/// `GET /` — status JSON, or a subscriber when the request is an upgrade.
pub async fn root_handler(
    State(state): State<Arc<RelayState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(state, ws),
        Err(_) => Json(http::status(&state)).into_response(),
    }
}

/// `GET /ws` — WebSocket upgrade for a subscriber.
pub async fn ws_handler(State(state): State<Arc<RelayState>>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws)
}

fn upgrade(state: Arc<RelayState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    ws.on_upgrade(move |socket| handle_subscriber(socket, state)).into_response()
}

/// Per-connection loop: register, relay queued payloads in order, deregister.
async fn handle_subscriber(socket: WebSocket, state: Arc<RelayState>) {
    let (subscriber, mut rx) = Subscriber::channel(state.config.subscriber_buffer);
    let id = subscriber.id();
    state.registry.add(subscriber);
    tracing::info!(subscriber = %id, "client connected ({} total)", state.registry.len());

    state.supervisor.ensure_connected();

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let frame = CloseFrame { code: close_code::AWAY, reason: "relay shutting down".into() };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break;
            }

            // Forward upstream payloads to this client.
            payload = rx.recv() => {
                match payload {
                    Some(payload) => {
                        if let Err(e) = ws_tx.send(to_message(payload)).await {
                            tracing::debug!(subscriber = %id, err = %e, "send to client failed");
                            break;
                        }
                    }
                    // Dropped from the registry.
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = %id, err = %e, "client WebSocket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.registry.remove(id);
    tracing::info!(subscriber = %id, "client disconnected ({} remaining)", state.registry.len());
}

fn to_message(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.as_ref().into()),
        Payload::Binary(bytes) => Message::Binary(bytes),
    }
}
