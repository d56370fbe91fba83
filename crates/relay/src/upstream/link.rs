// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One upstream WebSocket session: handshake, subscription, read loop.
//!
//! The link never retries on its own. Each [`UpstreamLink::connect`] +
//! [`UpstreamLink::pump`] pair is a single attempt; the supervisor decides
//! what happens after it ends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::broadcast::{Broadcaster, Payload};
use crate::error::{LinkError, ABNORMAL_CLOSURE};
use crate::subscription::SubscriptionSpec;

pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on either side of the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upstream connection lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Nothing attempted yet.
    #[default]
    Idle,
    Connecting,
    /// Socket open, subscription not yet sent.
    AwaitingAuth,
    /// Subscription sent; messages flow.
    Live,
    /// Session ended; a short retry is pending.
    Closed,
    /// Retry ceiling reached; cooling down.
    Suspended,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Live => "live",
            Self::Closed => "closed",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published to observers on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: LinkState,
    /// Consecutive failed sessions since the last successful subscription.
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Per-attempt settings.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub url: String,
    pub subscription: SubscriptionSpec,
    /// Window after the socket opens in which the subscription must be sent.
    pub subscribe_grace: Duration,
    pub connect_timeout: Duration,
    /// Relay UTF-8 binary frames as text frames.
    pub binary_as_text: bool,
}

pub struct UpstreamLink {
    config: LinkConfig,
    broadcaster: Arc<Broadcaster>,
    status: watch::Sender<LinkStatus>,
}

impl UpstreamLink {
    pub fn new(
        config: LinkConfig,
        broadcaster: Arc<Broadcaster>,
        status: watch::Sender<LinkStatus>,
    ) -> Self {
        Self { config, broadcaster, status }
    }

    pub fn state(&self) -> LinkState {
        self.status.borrow().state
    }

    pub(crate) fn transition(&self, state: LinkState) {
        self.status.send_modify(|s| s.state = state);
    }

    pub(crate) fn record(&self, state: LinkState, attempts: u32, last_error: Option<String>) {
        self.status.send_modify(|s| {
            s.state = state;
            s.attempts = attempts;
            if last_error.is_some() {
                s.last_error = last_error;
            }
        });
    }

    /// Open the socket and send the subscription. On success the link is `Live`.
    pub async fn connect(&self) -> Result<UpstreamStream, LinkError> {
        self.transition(LinkState::Connecting);
        tracing::debug!(url = %self.config.url, "connecting to upstream");

        let connect = tokio_tungstenite::connect_async(self.config.url.as_str());
        let (mut ws, _) = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(LinkError::Connect(e.to_string())),
            Err(_) => return Err(LinkError::ConnectTimeout),
        };

        self.transition(LinkState::AwaitingAuth);
        send_subscription(&mut ws, &self.config.subscription, self.config.subscribe_grace).await?;
        tracing::debug!(subscription = ?self.config.subscription, "subscription sent");

        self.transition(LinkState::Live);
        Ok(ws)
    }

    /// Forward upstream frames until the session ends or `cancel` fires.
    ///
    /// Returns `Ok(())` only on cancellation, after a best-effort close.
    pub async fn pump(
        &self,
        ws: &mut UpstreamStream,
        cancel: &CancellationToken,
    ) -> Result<(), LinkError> {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = ws.next() => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    self.on_message(Payload::Text(Arc::from(text.as_str())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    self.on_message(self.binary_payload(bytes));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.as_str().to_owned()),
                        None => (ABNORMAL_CLOSURE, String::new()),
                    };
                    // Flush the queued close reply so the upstream sees a clean handshake.
                    let drain = async { while let Some(Ok(_)) = ws.next().await {} };
                    if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
                        tracing::debug!("upstream close reply timed out");
                    }
                    return Err(LinkError::Closed { code, reason });
                }
                Some(Ok(_)) => {} // ping/pong/raw frames
                Some(Err(e)) => return Err(LinkError::Stream(e.to_string())),
                None => {
                    return Err(LinkError::Closed { code: ABNORMAL_CLOSURE, reason: String::new() })
                }
            }
        }

        if tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await.is_err() {
            tracing::debug!("upstream close handshake timed out");
        }
        Ok(())
    }

    fn on_message(&self, payload: Payload) {
        if self.state() != LinkState::Live {
            tracing::debug!(state = %self.state(), "discarding upstream message outside live session");
            return;
        }
        self.broadcaster.broadcast(&payload);
    }

    fn binary_payload(&self, bytes: Bytes) -> Payload {
        if self.config.binary_as_text {
            if let Ok(text) = std::str::from_utf8(&bytes) {
                return Payload::Text(Arc::from(text));
            }
        }
        Payload::Binary(bytes)
    }
}

/// Write the subscription as one text frame, failing if it cannot be flushed
/// within `grace`.
pub async fn send_subscription<S>(
    sink: &mut S,
    spec: &SubscriptionSpec,
    grace: Duration,
) -> Result<(), LinkError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let text = spec.to_message().map_err(|e| LinkError::Subscribe(e.to_string()))?;
    match tokio::time::timeout(grace, sink.send(Message::Text(text.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(LinkError::Subscribe(e.to_string())),
        Err(_) => Err(LinkError::SubscribeTimeout),
    }
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
