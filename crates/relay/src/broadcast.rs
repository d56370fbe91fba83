// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out of upstream payloads to every registered subscriber.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;

use crate::registry::SubscriberRegistry;

/// Number of relayed messages logged at info level after startup.
const LOGGED_MESSAGES: u64 = 5;

/// One upstream message, relayed byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(Arc<str>),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Outcome of a single [`Broadcaster::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    /// Queue full; this message skipped for that subscriber only.
    pub dropped: usize,
    /// Subscriber gone; removed from the registry.
    pub removed: usize,
}

pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
    relayed: AtomicU64,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry, relayed: AtomicU64::new(0) }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Total messages handed to [`broadcast`](Self::broadcast).
    pub fn relayed(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    /// Offer `payload` to every current subscriber without waiting on any of them.
    pub fn broadcast(&self, payload: &Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for subscriber in self.registry.snapshot() {
            report.attempted += 1;
            match subscriber.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    tracing::debug!(subscriber = %subscriber.id(), "subscriber queue full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    if self.registry.remove(subscriber.id()) {
                        report.removed += 1;
                        tracing::debug!(subscriber = %subscriber.id(), "subscriber gone, removed");
                    }
                }
            }
        }

        let n = self.relayed.fetch_add(1, Ordering::Relaxed) + 1;
        if n <= LOGGED_MESSAGES {
            tracing::info!(bytes = payload.len(), "AIS message #{n} → {} clients", report.delivered);
        } else {
            tracing::trace!(seq = n, delivered = report.delivered, "relayed upstream message");
        }

        report
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
