//! Shared hierarchical key-value store abstraction.
//!
//! Every quiz component talks to the store through [`SharedStore`]. Two
//! implementations ship with the crate:
//!
//! ```text
//!   MemoryStore ──connect(identity)──► MemoryClient   (in-process, tests)
//!        ▲
//!        │ owns
//!   StoreServer ◄──── WebSocket ────► RemoteStore    (one per participant)
//! ```
//!
//! Guarantees relied upon by the quiz layer:
//! - a committed [`WriteBatch`] is atomic; its conditions are checked
//!   against the same state the writes are applied to
//! - a [`Subscription`] delivers the current value first, then a
//!   monotonically newer value after each relevant change (intermediate
//!   values may be coalesced)
//! - push keys sort in creation order

pub mod memory;
pub mod rocks;
pub mod rules;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

pub use memory::{MemoryClient, MemoryStore};
pub use rocks::{StoreConfig, TreeStore};
pub use rules::{OpenRules, QuizRules, WriteRules};
pub use value::{StorePath, Tree, Value};

use futures_util::future::BoxFuture;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Identity of a participant as asserted by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&UserId> for UserId {
    fn from(id: &UserId) -> Self {
        id.clone()
    }
}

/// Link state as seen by one store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Link lost; the handle is retrying in the background.
    Reconnecting,
    Disconnected,
}

// ─── Write Batches ────────────────────────────────────────────────────

/// A single mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Replace the subtree at `path`; `None` removes it.
    Set { path: StorePath, value: Option<Value> },
    /// Create a child of `parent` under a fresh, creation-ordered key.
    Push { parent: StorePath, value: Value },
}

/// Precondition checked atomically with the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Absent(StorePath),
    Present(StorePath),
    Equals(StorePath, Option<Value>),
}

impl Condition {
    pub fn path(&self) -> &StorePath {
        match self {
            Condition::Absent(p) | Condition::Present(p) | Condition::Equals(p, _) => p,
        }
    }

    pub fn holds(&self, tree: &Tree) -> bool {
        match self {
            Condition::Absent(p) => tree.peek(p).is_none(),
            Condition::Present(p) => tree.peek(p).is_some(),
            Condition::Equals(p, expected) => tree.peek(p) == expected.as_ref(),
        }
    }
}

/// Ordered mutations plus the conditions that must hold for all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
    conditions: Vec<Condition>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: StorePath, value: impl Into<Value>) -> Self {
        self.ops.push(WriteOp::Set {
            path,
            value: Some(value.into()),
        });
        self
    }

    pub fn remove(mut self, path: StorePath) -> Self {
        self.ops.push(WriteOp::Set { path, value: None });
        self
    }

    pub fn push(mut self, parent: StorePath, value: Value) -> Self {
        self.ops.push(WriteOp::Push { parent, value });
        self
    }

    pub fn require(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn require_absent(self, path: StorePath) -> Self {
        self.require(Condition::Absent(path))
    }

    pub fn require_present(self, path: StorePath) -> Self {
        self.require(Condition::Present(path))
    }

    pub fn require_eq(self, path: StorePath, expected: Option<Value>) -> Self {
        self.require(Condition::Equals(path, expected))
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_parts(self) -> (Vec<WriteOp>, Vec<Condition>) {
        (self.ops, self.conditions)
    }
}

/// A write with its push key already assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWrite {
    pub path: StorePath,
    pub value: Option<Value>,
    pub pushed: bool,
}

/// Result of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub revision: u64,
    /// Keys generated for `Push` operations, in batch order.
    pub pushed_keys: Vec<String>,
}

// ─── Errors ───────────────────────────────────────────────────────────

/// Store-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreError {
    /// The store could not be reached; the operation may be retried.
    Unavailable(String),
    /// A batch condition did not hold; nothing was written.
    ConditionFailed { path: String },
    /// Access rules rejected the write.
    PermissionDenied { path: String, reason: String },
    InvalidPath(String),
    Protocol(String),
    Persistence(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {e}"),
            StoreError::ConditionFailed { path } => write!(f, "Condition failed at {path}"),
            StoreError::PermissionDenied { path, reason } => {
                write!(f, "Permission denied at {path}: {reason}")
            }
            StoreError::InvalidPath(e) => write!(f, "Invalid path: {e}"),
            StoreError::Protocol(e) => write!(f, "Protocol error: {e}"),
            StoreError::Persistence(e) => write!(f, "Persistence error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Persistence(e.to_string())
    }
}

// ─── Subscriptions ────────────────────────────────────────────────────

type CancelFn = Box<dyn FnOnce() + Send>;

/// Stream of values observed at one path.
///
/// The first item is the value at subscription time. Dropping the
/// subscription stops delivery.
pub struct Subscription {
    path: StorePath,
    rx: mpsc::Receiver<Option<Value>>,
    on_drop: Option<CancelFn>,
}

impl Subscription {
    pub fn new(path: StorePath, rx: mpsc::Receiver<Option<Value>>, on_drop: Option<CancelFn>) -> Self {
        Self { path, rx, on_drop }
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Next observed value, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}

    pub fn into_stream(self) -> impl Stream<Item = Option<Value>> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|value| (value, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.on_drop.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("path", &self.path).finish()
    }
}

// ─── Store Trait ──────────────────────────────────────────────────────

/// A handle to the shared store, bound to one identity.
pub trait SharedStore: Send + Sync {
    /// Identity every write from this handle is attributed to.
    fn identity(&self) -> &UserId;

    fn get<'a>(&'a self, path: &'a StorePath) -> BoxFuture<'a, Result<Option<Value>, StoreError>>;

    /// Commit a batch atomically or not at all.
    fn apply(&self, batch: WriteBatch) -> BoxFuture<'_, Result<CommitReceipt, StoreError>>;

    fn subscribe<'a>(&'a self, path: &'a StorePath) -> BoxFuture<'a, Result<Subscription, StoreError>>;

    fn connection(&self) -> watch::Receiver<ConnectionState>;
}

pub type StoreRef = Arc<dyn SharedStore>;

impl dyn SharedStore {
    /// Unconditional single-path write.
    pub async fn set(&self, path: &StorePath, value: impl Into<Value>) -> Result<CommitReceipt, StoreError> {
        self.apply(WriteBatch::new().set(path.clone(), value)).await
    }

    pub async fn exists(&self, path: &StorePath) -> Result<bool, StoreError> {
        Ok(self.get(path).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> StorePath {
        StorePath::parse(s).unwrap()
    }

    #[test]
    fn test_conditions() {
        let mut tree = Tree::new();
        tree.set(&path("s/1/started"), Some(Value::Bool(false)));

        assert!(Condition::Present(path("s/1")).holds(&tree));
        assert!(Condition::Absent(path("s/2")).holds(&tree));
        assert!(Condition::Equals(path("s/1/started"), Some(Value::Bool(false))).holds(&tree));
        assert!(!Condition::Equals(path("s/1/started"), Some(Value::Bool(true))).holds(&tree));
        assert!(Condition::Equals(path("s/1/score"), None).holds(&tree));
    }

    #[test]
    fn test_batch_builder() {
        let batch = WriteBatch::new()
            .require_absent(path("a"))
            .set(path("a/b"), 1u32)
            .push(path("a/list"), Value::from("x"))
            .remove(path("a/c"));
        assert_eq!(batch.ops().len(), 3);
        assert_eq!(batch.conditions().len(), 1);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_error_display() {
        let e = StoreError::ConditionFailed {
            path: "sessions/1".into(),
        };
        assert_eq!(e.to_string(), "Condition failed at sessions/1");
    }

    #[tokio::test]
    async fn test_subscription_drop_runs_cancel() {
        let (tx, rx) = mpsc::channel(4);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let mut sub = Subscription::new(
            path("a"),
            rx,
            Some(Box::new(move || {
                let _ = done_tx.send(());
            })),
        );
        tx.send(Some(Value::Int(1))).await.unwrap();
        assert_eq!(sub.next().await, Some(Some(Value::Int(1))));
        sub.unsubscribe();
        assert!(done_rx.await.is_ok());
    }
}
