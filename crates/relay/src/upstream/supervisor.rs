// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection supervisor: the single task that owns the upstream link, the
//! reconnect counter, and the pending retry timer.
//!
//! Everything that mutates link state runs on this task. Other tasks only
//! send it a trigger ([`SupervisorHandle::ensure_connected`]) or read the
//! published [`LinkStatus`].

use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::{BackoffPolicy, ReconnectSchedule, Retry};
use crate::broadcast::Broadcaster;
use crate::error::LinkError;
use crate::upstream::link::{LinkConfig, LinkState, LinkStatus, UpstreamLink};

/// Control surface for the supervisor task, shared behind an `Arc`.
pub struct SupervisorHandle {
    trigger: Arc<Notify>,
    status: watch::Receiver<LinkStatus>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisorHandle {
    /// Spawn the supervisor. It stays `Idle` until the first trigger.
    ///
    /// `shutdown` is the process token; the supervisor stops when it or
    /// [`shutdown`](Self::shutdown) fires.
    pub fn spawn(
        config: LinkConfig,
        policy: BackoffPolicy,
        broadcaster: Arc<Broadcaster>,
        shutdown: &CancellationToken,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let trigger = Arc::new(Notify::new());
        let cancel = shutdown.child_token();

        let supervisor = ConnectionSupervisor {
            link: UpstreamLink::new(config, broadcaster, status_tx),
            schedule: ReconnectSchedule::new(policy),
            trigger: Arc::clone(&trigger),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run());

        Self { trigger, status: status_rx, cancel, task: Mutex::new(Some(task)) }
    }

    /// Connect now unless an attempt is in flight or the link is live.
    ///
    /// From `Idle` this starts the first connect. From `Closed` or `Suspended`
    /// it cancels the pending retry timer and connects immediately; the
    /// attempt counter is left as it is. Repeated calls coalesce into a
    /// single connect. Returns `false` when the call was a no-op.
    pub fn ensure_connected(&self) -> bool {
        let state = self.status.borrow().state;
        let busy = matches!(state, LinkState::Connecting | LinkState::AwaitingAuth | LinkState::Live);
        if busy || self.cancel.is_cancelled() {
            tracing::trace!(%state, "upstream connect not needed");
            return false;
        }
        self.trigger.notify_one();
        true
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    pub fn is_live(&self) -> bool {
        self.status.borrow().state == LinkState::Live
    }

    /// Watch every status transition.
    pub fn subscribe_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Stop the supervisor and wait until the link and retry timer are released.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(err = %e, "upstream supervisor task failed");
            }
        }
    }
}

struct ConnectionSupervisor {
    link: UpstreamLink,
    schedule: ReconnectSchedule,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    async fn run(mut self) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = self.trigger.notified() => {}
        }

        loop {
            let err = match self.session().await {
                Ok(()) => break,
                Err(e) => e,
            };
            if self.cancel.is_cancelled() {
                break;
            }

            // A trigger stored while the last attempt was running is already
            // satisfied by it.
            let _ = self.trigger.notified().now_or_never();

            let retry = self.schedule.next_retry();
            self.on_failure(&err, retry);

            // The only pending retry timer; dropped on every exit from this loop.
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(retry.delay()) => {}
                _ = self.trigger.notified() => {
                    tracing::info!("subscriber waiting, retrying upstream now");
                }
            }
        }

        self.link.record(LinkState::Closed, self.schedule.attempts(), None);
        tracing::info!("upstream supervisor stopped");
    }

    /// One connect + subscribe + read cycle. `Ok` means cancelled.
    async fn session(&mut self) -> Result<(), LinkError> {
        tracing::info!(attempt = self.schedule.attempts() + 1, "connecting to upstream");

        let mut ws = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            ws = self.link.connect() => ws?,
        };

        self.schedule.reset();
        self.link.record(LinkState::Live, 0, None);
        tracing::info!("upstream live, subscription sent");

        self.link.pump(&mut ws, &self.cancel).await
    }

    fn on_failure(&self, err: &LinkError, retry: Retry) {
        match retry {
            Retry::Backoff { delay, attempt } => {
                self.link.record(LinkState::Closed, attempt, Some(err.to_string()));
                tracing::warn!(
                    err = %err,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "upstream disconnected, reconnecting in {:.1}s",
                    delay.as_secs_f64()
                );
            }
            Retry::Cooldown(delay) => {
                let max_attempts = self.schedule.policy().max_attempts;
                self.link.record(LinkState::Suspended, 0, Some(err.to_string()));
                tracing::error!(
                    err = %err,
                    max_attempts,
                    "max reconnect attempts reached, waiting {}s",
                    delay.as_secs()
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
