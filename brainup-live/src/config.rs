//! Tunables for quiz sessions.

use std::time::Duration;

/// When the host moves to the next round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancePolicy {
    /// Only when the round's countdown expires.
    Deadline,
    /// At the deadline, or as soon as every participant has answered.
    DeadlineOrAllAnswered,
}

/// Exponential backoff for store operations that failed with `Unavailable`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn for_testing() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Digits in a generated join code (default: 6)
    pub code_digits: u32,
    /// Codes tried before giving up on creation (default: 8)
    pub max_code_attempts: u32,
    /// Round length when neither the question nor the set has one (default: 10s)
    pub default_round_secs: u32,
    /// Participants required before the host may start (default: 1)
    pub min_participants: usize,
    pub advance_policy: AdvancePolicy,
    /// How often the host refreshes its heartbeat (default: 5s)
    pub heartbeat_interval: Duration,
    /// Heartbeat age after which the host is considered gone (default: 15s)
    pub host_lease: Duration,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            code_digits: 6,
            max_code_attempts: 8,
            default_round_secs: 10,
            min_participants: 1,
            advance_policy: AdvancePolicy::Deadline,
            heartbeat_interval: Duration::from_secs(5),
            host_lease: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Short timings and fast retries.
    pub fn for_testing() -> Self {
        Self {
            default_round_secs: 2,
            heartbeat_interval: Duration::from_millis(200),
            host_lease: Duration::from_secs(1),
            retry: RetryPolicy::for_testing(),
            ..Self::default()
        }
    }

    pub fn with_advance_policy(mut self, policy: AdvancePolicy) -> Self {
        self.advance_policy = policy;
        self
    }

    pub fn with_min_participants(mut self, min: usize) -> Self {
        self.min_participants = min;
        self
    }
}
