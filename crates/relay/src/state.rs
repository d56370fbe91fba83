// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::config::RelayConfig;
use crate::registry::SubscriberRegistry;
use crate::upstream::supervisor::SupervisorHandle;

/// Shared relay state.
pub struct RelayState {
    pub config: RelayConfig,
    pub shutdown: CancellationToken,
    pub registry: Arc<SubscriberRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub supervisor: SupervisorHandle,
}

impl RelayState {
    /// Build the state and spawn the upstream supervisor (idle until triggered).
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let supervisor = SupervisorHandle::spawn(
            config.link_config(),
            config.backoff_policy(),
            Arc::clone(&broadcaster),
            &shutdown,
        );
        Self { config, shutdown, registry, broadcaster, supervisor }
    }

    /// Close the upstream link, cancel any pending retry, and release every
    /// subscriber. Safe to call more than once.
    pub async fn drain(&self) {
        self.shutdown.cancel();
        self.supervisor.shutdown().await;
        let released = self.registry.clear();
        tracing::info!(subscribers = released, "relay drained");
    }
}
