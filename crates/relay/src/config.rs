// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::subscription::{BoundingBox, SubscriptionSpec};
use crate::upstream::link::LinkConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the relay.
#[derive(Clone, clap::Parser)]
#[command(name = "ais-relay", version, about = "Fan out one upstream AIS stream to many WebSocket clients")]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "AIS_RELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3001, env = "PORT")]
    pub port: u16,

    /// Upstream WebSocket endpoint.
    #[arg(
        long,
        default_value = "wss://stream.aisstream.io/v0/stream",
        env = "AIS_RELAY_UPSTREAM_URL"
    )]
    pub upstream_url: String,

    /// API key sent in the upstream subscription.
    #[arg(long, env = "AIS_RELAY_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Geographic filter as `lat1,lon1,lat2,lon2`. Repeatable; defaults to the whole globe.
    #[arg(long = "bbox", env = "AIS_RELAY_BBOX", value_delimiter = ';', allow_hyphen_values = true)]
    pub bounding_boxes: Vec<BoundingBox>,

    /// Upstream message types to receive. Empty means all types.
    #[arg(
        long = "message-type",
        env = "AIS_RELAY_MESSAGE_TYPES",
        value_delimiter = ',',
        default_value = "PositionReport"
    )]
    pub message_types: Vec<String>,

    /// First reconnect delay in milliseconds; doubles per consecutive failure.
    #[arg(long, default_value_t = 5000, env = "AIS_RELAY_RECONNECT_BASE_MS")]
    pub reconnect_base_ms: u64,

    /// Upper bound on the reconnect delay in milliseconds.
    #[arg(long, default_value_t = 30000, env = "AIS_RELAY_RECONNECT_CAP_MS")]
    pub reconnect_cap_ms: u64,

    /// Consecutive failures before switching to the cooldown delay.
    #[arg(long, default_value_t = 5, env = "AIS_RELAY_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// Cooldown in milliseconds once the attempt ceiling is reached.
    #[arg(long, default_value_t = 60000, env = "AIS_RELAY_RECONNECT_COOLDOWN_MS")]
    pub reconnect_cooldown_ms: u64,

    /// Window after the upstream socket opens in which the subscription must be sent.
    #[arg(long, default_value_t = 3000, env = "AIS_RELAY_SUBSCRIBE_GRACE_MS")]
    pub subscribe_grace_ms: u64,

    /// Upstream handshake timeout in milliseconds.
    #[arg(long, default_value_t = 10000, env = "AIS_RELAY_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Per-subscriber outbound queue length. Messages beyond it are dropped for that subscriber.
    #[arg(long, default_value_t = 256, env = "AIS_RELAY_SUBSCRIBER_BUFFER")]
    pub subscriber_buffer: usize,

    /// Connect upstream at startup instead of waiting for the first subscriber.
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "AIS_RELAY_CONNECT_ON_START"
    )]
    pub connect_on_start: bool,

    /// Relay UTF-8 binary upstream frames as text frames.
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "AIS_RELAY_BINARY_AS_TEXT"
    )]
    pub binary_as_text: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "AIS_RELAY_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl RelayConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.reconnect_base_ms),
            cap: Duration::from_millis(self.reconnect_cap_ms),
            max_attempts: self.max_reconnect_attempts,
            cooldown: Duration::from_millis(self.reconnect_cooldown_ms),
        }
    }

    pub fn subscription(&self) -> SubscriptionSpec {
        SubscriptionSpec::new(
            self.api_key.clone(),
            self.bounding_boxes.clone(),
            self.message_types.iter().filter(|t| !t.is_empty()).cloned().collect(),
        )
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            url: self.upstream_url.clone(),
            subscription: self.subscription(),
            subscribe_grace: self.subscribe_grace(),
            connect_timeout: self.connect_timeout(),
            binary_as_text: self.binary_as_text,
        }
    }

    pub fn subscribe_grace(&self) -> Duration {
        Duration::from_millis(self.subscribe_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// Hand-written so the API key never reaches logs in full.
impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("upstream_url", &self.upstream_url)
            .field("api_key", &self.subscription().redacted_key())
            .field("bounding_boxes", &self.bounding_boxes)
            .field("message_types", &self.message_types)
            .field("reconnect_base_ms", &self.reconnect_base_ms)
            .field("reconnect_cap_ms", &self.reconnect_cap_ms)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_cooldown_ms", &self.reconnect_cooldown_ms)
            .field("subscribe_grace_ms", &self.subscribe_grace_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("subscriber_buffer", &self.subscriber_buffer)
            .field("connect_on_start", &self.connect_on_start)
            .field("binary_as_text", &self.binary_as_text)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
