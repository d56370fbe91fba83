// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ais-relay: one upstream AIS WebSocket subscription fanned out to many
//! downstream WebSocket clients.

pub mod backoff;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;
pub mod subscription;
pub mod test_support;
pub mod transport;
pub mod upstream;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::state::RelayState;
use crate::transport::build_router;

/// Run the relay until SIGTERM/SIGINT, then drain.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    tracing::info!(
        upstream = %config.upstream_url,
        subscription = ?config.subscription(),
        "starting relay"
    );

    let state = Arc::new(RelayState::new(config.clone(), shutdown.clone()));
    spawn_signal_handler(shutdown.clone());

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            state.drain().await;
            return Err(e.into());
        }
    };
    tracing::info!("ais-relay listening on {addr}");

    if config.connect_on_start {
        state.supervisor.ensure_connected();
    }

    let router = build_router(Arc::clone(&state));
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    state.drain().await;
    served?;
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGTERM, closing relay");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGINT, closing relay");
            }
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
}
