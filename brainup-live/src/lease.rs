//! Host liveness from the heartbeat the host writes while it runs rounds.
//!
//! ## Takeover
//!
//! Sessions do not fail over. When a lease expires, participants are told
//! the host is gone and the session stays where it stopped. A takeover
//! would need:
//!
//! ```text
//! 1. candidate reads hostHeartbeat = h and sees now - h > lease
//! 2. candidate commits { require hostHeartbeat == h,
//!                        set hostId = candidate, set hostHeartbeat = now }
//! 3. losers of that race see ConditionFailed and stay participants
//! 4. the winner attaches a RoundController and resumes the countdown
//! ```
//!
//! which in turn needs `hostId` to become writable under the condition
//! above in the access rules.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    /// No heartbeat has been written yet.
    Unknown,
    Alive { age: Duration },
    Expired { age: Duration },
}

impl LeaseStatus {
    pub fn is_expired(&self) -> bool {
        matches!(self, LeaseStatus::Expired { .. })
    }
}

/// Judges heartbeat age against a fixed lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLease {
    ttl: Duration,
}

impl HostLease {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Heartbeats from the future (clock skew) count as fresh.
    pub fn evaluate(&self, heartbeat_ms: Option<u64>, now_ms: u64) -> LeaseStatus {
        let Some(heartbeat) = heartbeat_ms else {
            return LeaseStatus::Unknown;
        };
        let age = Duration::from_millis(now_ms.saturating_sub(heartbeat));
        if age > self.ttl {
            LeaseStatus::Expired { age }
        } else {
            LeaseStatus::Alive { age }
        }
    }

    pub fn evaluate_now(&self, heartbeat_ms: Option<u64>) -> LeaseStatus {
        self.evaluate(heartbeat_ms, now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_without_heartbeat() {
        let lease = HostLease::new(Duration::from_secs(15));
        assert_eq!(lease.evaluate(None, 1_000), LeaseStatus::Unknown);
    }

    #[test]
    fn test_alive_and_expired() {
        let lease = HostLease::new(Duration::from_secs(15));
        assert_eq!(
            lease.evaluate(Some(10_000), 20_000),
            LeaseStatus::Alive {
                age: Duration::from_secs(10)
            }
        );
        let status = lease.evaluate(Some(10_000), 40_000);
        assert!(status.is_expired());
    }

    #[test]
    fn test_future_heartbeat_is_fresh() {
        let lease = HostLease::new(Duration::from_secs(1));
        assert_eq!(
            lease.evaluate(Some(5_000), 1_000),
            LeaseStatus::Alive { age: Duration::ZERO }
        );
    }
}
