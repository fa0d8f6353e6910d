//! In-process shared store.
//!
//! `MemoryStore` owns the tree; each participant talks to it through a
//! [`MemoryClient`] bound to their identity. The same store backs the
//! WebSocket server, and optionally persists every commit to RocksDB.
//!
//! Commit order for one batch, all under the tree write lock:
//!
//! ```text
//! availability ─► conditions ─► push keys ─► rules ─► persist ─► apply ─► publish
//! ```

use futures_util::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch, RwLock};

use super::rocks::{StoreConfig, TreeStore};
use super::rules::{OpenRules, QuizRules, WriteRules};
use super::{
    CommitReceipt, ConnectionState, ResolvedWrite, SharedStore, StoreError, StorePath,
    Subscription, Tree, UserId, Value, WriteBatch, WriteOp,
};
use crate::broadcast::{ChangeEvent, ChangeFeed, FeedStats};

/// Events buffered per subscription forwarder before it re-reads.
const FEED_CAPACITY: usize = 256;
/// Values buffered per subscription for a slow consumer.
const SUBSCRIPTION_BUFFER: usize = 64;

struct MemoryInner {
    tree: RwLock<Tree>,
    feed: ChangeFeed,
    rules: Box<dyn WriteRules>,
    revision: AtomicU64,
    failing_writes: AtomicU32,
    connection: watch::Sender<ConnectionState>,
    persistence: Option<TreeStore>,
}

/// Shared in-memory tree with access rules and change notification.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    /// Store enforcing the quiz access rules.
    pub fn new() -> Self {
        Self::with_rules(QuizRules)
    }

    /// Store accepting any write.
    pub fn unguarded() -> Self {
        Self::with_rules(OpenRules)
    }

    pub fn with_rules(rules: impl WriteRules + 'static) -> Self {
        Self::build(Box::new(rules), Tree::new(), 0, None)
    }

    /// Store enforcing the quiz rules, recovered from and persisted to RocksDB.
    pub fn open_persistent(config: StoreConfig) -> Result<Self, StoreError> {
        Self::open_persistent_with_rules(config, QuizRules)
    }

    pub fn open_persistent_with_rules(config: StoreConfig, rules: impl WriteRules + 'static) -> Result<Self, StoreError> {
        let persistence = TreeStore::open(config)?;
        let tree = persistence.load_tree()?;
        let revision = persistence.revision()?;
        log::info!(
            "Recovered {} leaves at revision {revision} from {}",
            tree.leaves().len(),
            persistence.path().display()
        );
        Ok(Self::build(Box::new(rules), tree, revision, Some(persistence)))
    }

    fn build(
        rules: Box<dyn WriteRules>,
        tree: Tree,
        revision: u64,
        persistence: Option<TreeStore>,
    ) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Connected);
        Self {
            inner: Arc::new(MemoryInner {
                tree: RwLock::new(tree),
                feed: ChangeFeed::new(FEED_CAPACITY),
                rules,
                revision: AtomicU64::new(revision),
                failing_writes: AtomicU32::new(0),
                connection,
                persistence,
            }),
        }
    }

    /// A handle whose writes are attributed to `identity`.
    pub fn connect(&self, identity: impl Into<UserId>) -> MemoryClient {
        MemoryClient {
            inner: self.inner.clone(),
            identity: identity.into(),
        }
    }

    /// [`connect`](Self::connect), type-erased.
    pub fn handle(&self, identity: impl Into<UserId>) -> super::StoreRef {
        Arc::new(self.connect(identity))
    }

    /// Fail the next `count` batches with `Unavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Take the store offline or bring it back. Offline reads and writes
    /// fail with `Unavailable`; open subscriptions stay attached.
    pub fn set_available(&self, available: bool) {
        let state = if available {
            ConnectionState::Connected
        } else {
            ConnectionState::Reconnecting
        };
        self.inner.connection.send_replace(state);
        log::info!("Memory store is now {state:?}");
    }

    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::SeqCst)
    }

    /// Read without an identity or availability check.
    pub async fn snapshot(&self, path: &StorePath) -> Option<Value> {
        self.inner.tree.read().await.get(path)
    }

    pub fn feed_stats(&self) -> FeedStats {
        self.inner.feed.stats()
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.persistence.is_some()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInner {
    fn ensure_available(&self) -> Result<(), StoreError> {
        match *self.connection.borrow() {
            ConnectionState::Connected => Ok(()),
            state => Err(StoreError::Unavailable(format!("store is {state:?}"))),
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Creation-ordered key: the commit revision and the push's position in
    /// its batch, then wall-clock millis for readability. Revisions are
    /// persisted, so order holds across restarts whatever the clock does.
    fn next_push_key(&self, revision: u64, position: usize) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        format!("{revision:012x}{position:04x}-{millis:011x}")
    }

    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.ensure_available()?;
        path.validate()?;
        Ok(self.tree.read().await.get(path))
    }

    async fn commit(&self, caller: &UserId, batch: WriteBatch) -> Result<CommitReceipt, StoreError> {
        self.ensure_available()?;
        if self.take_injected_failure() {
            log::warn!("Injected write failure for {caller}");
            return Err(StoreError::Unavailable("injected write failure".into()));
        }

        let (ops, conditions) = batch.into_parts();
        let mut tree = self.tree.write().await;

        for condition in &conditions {
            if !condition.holds(&tree) {
                log::debug!("Batch from {caller} rejected: condition at {}", condition.path());
                return Err(StoreError::ConditionFailed {
                    path: condition.path().to_string(),
                });
            }
        }

        let revision = self.revision.load(Ordering::SeqCst) + 1;
        let mut writes = Vec::with_capacity(ops.len());
        let mut pushed_keys = Vec::new();
        for (position, op) in ops.into_iter().enumerate() {
            let write = match op {
                WriteOp::Set { path, value } => ResolvedWrite {
                    path,
                    value,
                    pushed: false,
                },
                WriteOp::Push { parent, value } => {
                    let key = self.next_push_key(revision, position);
                    pushed_keys.push(key.clone());
                    ResolvedWrite {
                        path: parent.child(key),
                        value: Some(value),
                        pushed: true,
                    }
                }
            };
            if write.path.is_root() {
                return Err(StoreError::InvalidPath("the root cannot be written".into()));
            }
            write.path.validate()?;
            writes.push(write);
        }

        if let Err(e) = self.rules.check(caller, &tree, &writes) {
            log::warn!("Batch from {caller} denied: {e}");
            return Err(e);
        }

        if let Some(persistence) = &self.persistence {
            persistence.persist(&writes, revision)?;
        }

        let mut paths = Vec::with_capacity(writes.len());
        for write in writes {
            tree.set(&write.path, write.value);
            paths.push(write.path);
        }
        self.revision.store(revision, Ordering::SeqCst);
        self.feed.publish(ChangeEvent { revision, paths });

        Ok(CommitReceipt {
            revision,
            pushed_keys,
        })
    }

    async fn subscribe(self: &Arc<Self>, path: &StorePath) -> Result<Subscription, StoreError> {
        self.ensure_available()?;
        path.validate()?;

        // Snapshot and feed receiver under one read lock: every later commit
        // is seen by the receiver.
        let (initial, mut events) = {
            let tree = self.tree.read().await;
            (tree.get(path), self.feed.subscribe())
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        if tx.try_send(initial.clone()).is_err() {
            return Err(StoreError::Unavailable("subscription closed".into()));
        }

        let weak: Weak<MemoryInner> = Arc::downgrade(self);
        let watched = path.clone();
        let task = tokio::spawn(async move {
            let mut last = initial;
            loop {
                match events.recv().await {
                    Ok(event) if !event.touches(&watched) => continue,
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        if let Some(inner) = weak.upgrade() {
                            inner.feed.record_lag(missed);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }

                let current = match weak.upgrade() {
                    Some(inner) => inner.tree.read().await.get(&watched),
                    None => break,
                };
                if current != last {
                    if tx.send(current.clone()).await.is_err() {
                        break;
                    }
                    last = current;
                }
            }
        });

        let abort = task.abort_handle();
        Ok(Subscription::new(
            path.clone(),
            rx,
            Some(Box::new(move || abort.abort())),
        ))
    }
}

/// A [`MemoryStore`] handle bound to one identity.
#[derive(Clone)]
pub struct MemoryClient {
    inner: Arc<MemoryInner>,
    identity: UserId,
}

impl SharedStore for MemoryClient {
    fn identity(&self) -> &UserId {
        &self.identity
    }

    fn get<'a>(&'a self, path: &'a StorePath) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        self.inner.read(path).boxed()
    }

    fn apply(&self, batch: WriteBatch) -> BoxFuture<'_, Result<CommitReceipt, StoreError>> {
        self.inner.commit(&self.identity, batch).boxed()
    }

    fn subscribe<'a>(&'a self, path: &'a StorePath) -> BoxFuture<'a, Result<Subscription, StoreError>> {
        self.inner.subscribe(path).boxed()
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }
}
