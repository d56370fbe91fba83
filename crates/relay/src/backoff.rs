// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect policy: capped exponential backoff with an attempt ceiling.
//!
//! After `max_attempts` consecutive failures the next retry waits a fixed
//! cooldown instead, and the counter starts over from zero.

use std::time::Duration;

/// Reconnect timing constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(30),
            max_attempts: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^attempts, cap)`.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// What to do after a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Short retry; `attempt` is the 1-based count of consecutive failures.
    Backoff { delay: Duration, attempt: u32 },
    /// Ceiling reached; wait out the cooldown before trying again.
    Cooldown(Duration),
}

impl Retry {
    pub fn delay(&self) -> Duration {
        match self {
            Self::Backoff { delay, .. } => *delay,
            Self::Cooldown(delay) => *delay,
        }
    }
}

/// Consecutive-failure counter driven by the supervisor.
#[derive(Debug)]
pub struct ReconnectSchedule {
    policy: BackoffPolicy,
    attempts: u32,
}

impl ReconnectSchedule {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Record a failure and decide the next retry.
    pub fn next_retry(&mut self) -> Retry {
        if self.attempts >= self.policy.max_attempts {
            self.attempts = 0;
            return Retry::Cooldown(self.policy.cooldown);
        }
        let delay = self.policy.delay(self.attempts);
        self.attempts += 1;
        Retry::Backoff { delay, attempt: self.attempts }
    }

    /// Called on every successful subscription.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
