// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP status handlers.

use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::RelayState;
use crate::upstream::link::LinkState;

pub const SERVICE_NAME: &str = "AIS Relay";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub clients: usize,
    pub ais_connected: bool,
    pub link_state: LinkState,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub messages_relayed: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Relay status for the `GET /` probe.
pub fn status(s: &RelayState) -> StatusResponse {
    let link = s.supervisor.status();
    StatusResponse {
        status: "running",
        service: SERVICE_NAME,
        clients: s.registry.len(),
        ais_connected: link.state == LinkState::Live,
        link_state: link.state,
        reconnect_attempts: link.attempts,
        last_error: link.last_error,
        messages_relayed: s.broadcaster.relayed(),
    }
}

/// `GET /health` — liveness only.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

