// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use ais_relay::config::{LogFormat, RelayConfig};

#[tokio::main]
async fn main() {
    let config = RelayConfig::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    // wss:// upstreams need a process-wide rustls provider.
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        error!("rustls crypto provider already installed");
    }

    if let Err(e) = ais_relay::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
