//! Bounded retry for transient store failures.

use std::future::Future;

use crate::config::RetryPolicy;
use crate::store::StoreError;

/// Run `op` until it succeeds, fails with something other than
/// `Unavailable`, or the policy's attempts are used up.
///
/// Only idempotent or conditionally guarded operations belong here: a
/// write that reached the store before the link dropped is retried too.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match op().await {
            Err(StoreError::Unavailable(reason)) if attempt < max_attempts => {
                log::warn!("{what} failed (attempt {attempt}/{max_attempts}): {reason}; retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(StoreError::Unavailable(reason)) => {
                log::error!("{what} gave up after {attempt} attempt(s): {reason}");
                return Err(StoreError::Unavailable(reason));
            }
            other => return other,
        }
    }
}
