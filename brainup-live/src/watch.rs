//! Typed subscriptions.

use futures_util::Stream;
use std::marker::PhantomData;

use crate::error::QuizError;
use crate::model::FromStoreValue;
use crate::store::{StorePath, StoreRef, Subscription};

/// Decoded stream of one path's value.
///
/// Yields the current value first. Dropping the watch (or calling
/// [`unsubscribe`](Self::unsubscribe)) releases the store subscription.
pub struct Watch<T> {
    subscription: Subscription,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromStoreValue> Watch<T> {
    pub async fn open(store: &StoreRef, path: StorePath) -> Result<Self, QuizError> {
        let subscription = store.subscribe(&path).await?;
        Ok(Self {
            subscription,
            _marker: PhantomData,
        })
    }

    pub fn path(&self) -> &StorePath {
        self.subscription.path()
    }

    /// Next decoded value; `None` once the store stops delivering.
    pub async fn next(&mut self) -> Option<Result<T, QuizError>> {
        let value = self.subscription.next().await?;
        Some(T::from_store_value(self.subscription.path(), value.as_ref()))
    }

    /// Wait for the first value satisfying `accept`.
    pub async fn wait_for(&mut self, mut accept: impl FnMut(&T) -> bool) -> Result<T, QuizError> {
        loop {
            match self.next().await {
                Some(Ok(value)) if accept(&value) => return Ok(value),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(QuizError::StoreUnavailable(format!(
                        "subscription to {} ended",
                        self.path()
                    )))
                }
            }
        }
    }

    pub fn unsubscribe(self) {}
}

impl<T: FromStoreValue + Send + 'static> Watch<T> {
    pub fn into_stream(self) -> impl Stream<Item = Result<T, QuizError>> + Send {
        futures_util::stream::unfold(self, |mut watch| async move {
            watch.next().await.map(|item| (item, watch))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Value};
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_watch_decodes_and_waits() {
        let store = MemoryStore::unguarded();
        let client = store.handle("alice");
        let path = StorePath::parse("sessions/111111/started").unwrap();

        let mut watch = Watch::<bool>::open(&client, path.clone()).await.unwrap();
        assert_eq!(watch.next().await.unwrap().unwrap(), false);

        let writer = client.clone();
        tokio::spawn(async move {
            writer.set(&path, true).await.unwrap();
        });
        assert!(watch.wait_for(|started| *started).await.unwrap());
    }

    #[tokio::test]
    async fn test_watch_reports_malformed() {
        let store = MemoryStore::unguarded();
        let client = store.handle("alice");
        let path = StorePath::parse("x/flag").unwrap();
        client.set(&path, Value::from("yes")).await.unwrap();

        let watch = Watch::<bool>::open(&client, path).await.unwrap();
        let mut stream = Box::pin(watch.into_stream());
        assert!(matches!(
            stream.next().await,
            Some(Err(QuizError::Malformed { .. }))
        ));
    }
}
