// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Set of connected downstream subscribers.
//!
//! Membership is keyed by [`SubscriberId`] only. Broadcasts iterate a
//! snapshot taken under the read lock, so add/remove never contend with an
//! in-flight fan-out beyond the copy itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::broadcast::Payload;

/// Process-unique subscriber identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Broadcast side of one downstream connection.
///
/// The connection task owns the socket and drains the paired receiver.
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Payload>,
}

impl Subscriber {
    /// Create a subscriber with a fresh id and an outbound queue of `buffer` payloads.
    pub fn channel(buffer: usize) -> (Arc<Self>, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Arc::new(Self { id: SubscriberId::next(), tx }), rx)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Non-blocking enqueue.
    pub fn try_send(&self, payload: Payload) -> Result<(), mpsc::error::TrySendError<Payload>> {
        self.tx.try_send(payload)
    }
}

#[derive(Default)]
pub struct SubscriberRegistry {
    members: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the subscriber was already present.
    pub fn add(&self, subscriber: Arc<Subscriber>) -> bool {
        let mut members = self.members.write();
        if members.contains_key(&subscriber.id) {
            return false;
        }
        members.insert(subscriber.id, subscriber);
        true
    }

    /// Returns `false` if the subscriber was absent.
    pub fn remove(&self, id: SubscriberId) -> bool {
        self.members.write().remove(&id).is_some()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members.read().contains_key(&id)
    }

    /// Point-in-time copy of the membership for one broadcast.
    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.members.read().values().map(Arc::clone).collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every member. Their receivers observe a closed channel once any
    /// outstanding snapshot is released.
    pub fn clear(&self) -> usize {
        let mut members = self.members.write();
        let n = members.len();
        members.clear();
        n
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
