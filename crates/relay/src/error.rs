// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Why an upstream session ended. Every variant is retried by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Handshake failed (refused, DNS, TLS, HTTP rejection).
    Connect(String),
    /// Handshake did not complete within the connect timeout.
    ConnectTimeout,
    /// The subscription could not be written.
    Subscribe(String),
    /// The subscription was not sent within the grace window.
    SubscribeTimeout,
    /// The upstream closed the session.
    Closed { code: u16, reason: String },
    /// Read error on an established session.
    Stream(String),
}

impl LinkError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect(_) => "CONNECT_FAILED",
            Self::ConnectTimeout => "CONNECT_TIMEOUT",
            Self::Subscribe(_) => "SUBSCRIBE_FAILED",
            Self::SubscribeTimeout => "SUBSCRIBE_TIMEOUT",
            Self::Closed { .. } => "CLOSED",
            Self::Stream(_) => "STREAM_ERROR",
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "{}: {e}", self.as_str()),
            Self::ConnectTimeout | Self::SubscribeTimeout => f.write_str(self.as_str()),
            Self::Subscribe(e) => write!(f, "{}: {e}", self.as_str()),
            Self::Closed { code, reason } if reason.is_empty() => {
                write!(f, "{}: code {code}, no reason provided", self.as_str())
            }
            Self::Closed { code, reason } => write!(f, "{}: code {code}, {reason}", self.as_str()),
            Self::Stream(e) => write!(f, "{}: {e}", self.as_str()),
        }
    }
}

impl std::error::Error for LinkError {}
