//! Store wrappers for exercising failure paths in unit tests.

use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

use super::{
    CommitReceipt, ConnectionState, SharedStore, StoreError, StorePath, StoreRef, Subscription, UserId, Value,
    WriteBatch,
};

/// Commits the next `count` batches, then reports `Unavailable` for each as
/// if the reply never arrived.
pub(crate) struct LostReplies {
    inner: StoreRef,
    remaining: AtomicU32,
}

impl LostReplies {
    pub(crate) fn new(inner: StoreRef, count: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(count),
        }
    }
}

impl SharedStore for LostReplies {
    fn identity(&self) -> &UserId {
        self.inner.identity()
    }

    fn get<'a>(&'a self, path: &'a StorePath) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        self.inner.get(path)
    }

    fn apply(&self, batch: WriteBatch) -> BoxFuture<'_, Result<CommitReceipt, StoreError>> {
        async move {
            let receipt = self.inner.apply(batch).await?;
            let lost = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Err(StoreError::Unavailable("reply lost".into()));
            }
            Ok(receipt)
        }
        .boxed()
    }

    fn subscribe<'a>(&'a self, path: &'a StorePath) -> BoxFuture<'a, Result<Subscription, StoreError>> {
        self.inner.subscribe(path)
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection()
    }
}
