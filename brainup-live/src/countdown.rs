//! Local per-round countdown.
//!
//! Each client runs its own countdown from the moment it observes a new
//! question index. There is no shared clock, so clients drift by their
//! observation latency; the host's countdown alone decides when a round
//! ends.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Whole seconds remaining, rounded up.
fn ceil_secs(d: Duration) -> u32 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// A ticking countdown publishing whole seconds remaining.
///
/// Ticks once per second and once more at the deadline, reaching 0
/// exactly when the budget is spent. Dropping it stops the ticker.
pub struct Countdown {
    remaining: watch::Receiver<u32>,
    deadline: Instant,
    budget: Duration,
    task: JoinHandle<()>,
}

impl Countdown {
    pub fn start(budget: Duration) -> Self {
        let started = Instant::now();
        let deadline = started + budget;
        let (tx, remaining) = watch::channel(ceil_secs(budget));

        let task = tokio::spawn(async move {
            let mut tick = started;
            while tick < deadline {
                tick = (tick + Duration::from_secs(1)).min(deadline);
                tokio::time::sleep_until(tick).await;
                if tx.send(ceil_secs(deadline - tick)).is_err() {
                    break;
                }
            }
        });

        Self {
            remaining,
            deadline,
            budget,
            task,
        }
    }

    pub fn remaining(&self) -> u32 {
        *self.remaining.borrow()
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == 0
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Receiver of every tick, for rendering.
    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.remaining.clone()
    }

    /// Resolves when the countdown reaches zero. Never resolves once cancelled.
    pub async fn expired(&mut self) {
        if self.remaining.wait_for(|secs| *secs == 0).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(2500)), 3);
        assert_eq!(ceil_secs(Duration::from_secs(10)), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_down_to_zero() {
        let mut countdown = Countdown::start(Duration::from_secs(3));
        assert_eq!(countdown.remaining(), 3);

        let mut ticks = countdown.subscribe();
        let mut seen = Vec::new();
        while ticks.changed().await.is_ok() {
            let secs = *ticks.borrow_and_update();
            seen.push(secs);
            if secs == 0 {
                break;
            }
        }
        assert_eq!(seen, vec![2, 1, 0]);
        countdown.expired().await;
        assert!(countdown.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_at_deadline() {
        let start = Instant::now();
        let mut countdown = Countdown::start(Duration::from_millis(2500));
        assert_eq!(countdown.remaining(), 3);
        countdown.expired().await;
        assert_eq!(Instant::now() - start, Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_never_expires() {
        let mut countdown = Countdown::start(Duration::from_secs(1));
        countdown.cancel();
        let waited = tokio::time::timeout(Duration::from_secs(5), countdown.expired()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_is_expired() {
        let mut countdown = Countdown::start(Duration::ZERO);
        assert!(countdown.is_expired());
        countdown.expired().await;
    }
}
