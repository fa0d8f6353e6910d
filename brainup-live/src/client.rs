//! WebSocket client for a remote [`StoreServer`](crate::server::StoreServer).
//!
//! Provides:
//! - request/reply correlation for reads and batches
//! - subscriptions that survive reconnects (re-sent after every handshake)
//! - connection state for presentation layers
//!
//! ```text
//!   get / apply ──► pending[id] ──► outgoing ──► WebSocket
//!   subscribe ────► subs[id] ◄──── Update{id} ◄── WebSocket
//!                      │ latest value (coalesced)
//!                      ▼
//!                 forwarder ──► Subscription
//! ```
//!
//! While disconnected, requests fail fast with `Unavailable`; callers
//! retry through [`with_backoff`](crate::retry::with_backoff).

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::protocol::{ClientFrame, ProtocolError, Reply, ServerFrame};
use crate::store::{
    CommitReceipt, ConnectionState, SharedStore, StoreError, StorePath, Subscription, UserId, Value,
    WriteBatch,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client tuning.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// How long a request waits for its reply
    pub request_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Values buffered per subscription for a slow consumer
    pub subscription_buffer: usize,
    pub outgoing_capacity: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            reconnect_initial: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(5),
            subscription_buffer: 64,
            outgoing_capacity: 256,
        }
    }
}

impl RemoteConfig {
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            reconnect_initial: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(200),
            ..Self::default()
        }
    }
}

struct SubEntry {
    path: StorePath,
    latest: watch::Sender<Option<Option<Value>>>,
    forwarder: AbortHandle,
}

struct Shared {
    url: String,
    identity: UserId,
    client_id: Uuid,
    config: RemoteConfig,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Reply, StoreError>>>>,
    subs: Mutex<HashMap<u64, SubEntry>>,
    outgoing: Mutex<Option<mpsc::Sender<ClientFrame>>>,
    state: watch::Sender<ConnectionState>,
    revision: AtomicU64,
    closed: AtomicBool,
}

/// Lock that ignores poisoning; the maps stay consistent across panics.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A [`SharedStore`] handle backed by a WebSocket connection.
pub struct RemoteStore {
    shared: Arc<Shared>,
    supervisor: AbortHandle,
}

impl RemoteStore {
    /// Connect to `url` as `identity`.
    ///
    /// Fails if the first handshake does not complete; later disconnects
    /// are retried in the background.
    pub async fn connect(
        url: impl Into<String>,
        identity: impl Into<UserId>,
        config: RemoteConfig,
    ) -> Result<Self, StoreError> {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            url: url.into(),
            identity: identity.into(),
            client_id: Uuid::new_v4(),
            config,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subs: Mutex::new(HashMap::new()),
            outgoing: Mutex::new(None),
            state,
            revision: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let stream = match shared.handshake().await {
            Ok(stream) => stream,
            Err(e) => {
                shared.state.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        let outgoing = shared.install_outgoing();
        log::info!("Connected to {} as {}", shared.url, shared.identity);

        let task = tokio::spawn(Shared::supervise(shared.clone(), stream, outgoing));
        Ok(Self {
            shared,
            supervisor: task.abort_handle(),
        })
    }

    pub fn client_id(&self) -> Uuid {
        self.shared.client_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Server revision reported by the latest handshake.
    pub fn server_revision(&self) -> u64 {
        self.shared.revision.load(Ordering::SeqCst)
    }

    /// Round-trip a ping; returns the elapsed time.
    pub async fn ping(&self) -> Result<Duration, StoreError> {
        let started = tokio::time::Instant::now();
        match self.shared.request(|id| ClientFrame::Ping { id }).await? {
            Reply::Pong => Ok(started.elapsed()),
            other => Err(unexpected(&other)),
        }
    }

    /// Drop the connection for good. Open subscriptions end.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.supervisor.abort();
        lock(&self.shared.outgoing).take();
        for (_, entry) in lock(&self.shared.subs).drain() {
            entry.forwarder.abort();
        }
        self.shared.fail_pending("client closed");
        self.shared.state.send_replace(ConnectionState::Disconnected);
        log::info!("Closed connection to {}", self.shared.url);
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn unexpected(reply: &Reply) -> StoreError {
    ProtocolError::UnexpectedFrame(format!("{reply:?}")).into()
}

impl Shared {
    async fn handshake(&self) -> Result<WsStream, StoreError> {
        let timeout = self.config.request_timeout;
        let (mut ws, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(self.url.as_str()))
            .await
            .map_err(|_| StoreError::from(ProtocolError::Timeout))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let hello = ClientFrame::Hello {
            identity: self.identity.clone(),
            client_id: self.client_id,
        }
        .encode()?;
        ws.send(Message::Binary(hello.into()))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        loop {
            let msg = tokio::time::timeout(timeout, ws.next())
                .await
                .map_err(|_| StoreError::from(ProtocolError::Timeout))?;
            match msg {
                Some(Ok(Message::Binary(data))) => {
                    let bytes: Vec<u8> = data.into();
                    return match ServerFrame::decode(&bytes)? {
                        ServerFrame::Welcome { revision, .. } => {
                            self.revision.store(revision, Ordering::SeqCst);
                            Ok(ws)
                        }
                        other => Err(ProtocolError::UnexpectedFrame(format!("{other:?}")).into()),
                    };
                }
                Some(Ok(Message::Close(_))) | None => return Err(ProtocolError::ConnectionClosed.into()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(StoreError::Unavailable(e.to_string())),
            }
        }
    }

    /// Open the outgoing channel for a fresh connection and mark it live.
    fn install_outgoing(&self) -> mpsc::Receiver<ClientFrame> {
        let (tx, rx) = mpsc::channel(self.config.outgoing_capacity.max(1));
        *lock(&self.outgoing) = Some(tx);
        self.state.send_replace(ConnectionState::Connected);
        rx
    }

    /// Own the connection: pump it, and reconnect with backoff when it drops.
    async fn supervise(shared: Arc<Shared>, stream: WsStream, outgoing: mpsc::Receiver<ClientFrame>) {
        let mut current = Some((stream, outgoing));
        loop {
            if let Some((stream, outgoing)) = current.take() {
                shared.pump(stream, outgoing).await;
                lock(&shared.outgoing).take();
                shared.fail_pending("connection lost");
                if shared.closed.load(Ordering::SeqCst) {
                    return;
                }
                shared.state.send_replace(ConnectionState::Reconnecting);
                log::warn!("Lost connection to {}; reconnecting", shared.url);
            }

            let mut delay = shared.config.reconnect_initial;
            let mut attempt = 1u32;
            while current.is_none() {
                tokio::time::sleep(delay).await;
                if shared.closed.load(Ordering::SeqCst) {
                    return;
                }
                match shared.handshake().await {
                    Ok(stream) => {
                        let outgoing = shared.install_outgoing();
                        shared.resubscribe();
                        log::info!("Reconnected to {} after {attempt} attempt(s)", shared.url);
                        current = Some((stream, outgoing));
                    }
                    Err(e) => {
                        log::debug!("Reconnect attempt {attempt} to {} failed: {e}", shared.url);
                        delay = (delay * 2).min(shared.config.reconnect_max);
                        attempt += 1;
                    }
                }
            }
        }
    }

    async fn pump(&self, stream: WsStream, mut outgoing: mpsc::Receiver<ClientFrame>) {
        let (mut ws_sender, mut ws_receiver) = stream.split();
        loop {
            tokio::select! {
                frame = outgoing.recv() => {
                    let Some(frame) = frame else { break };
                    match frame.encode() {
                        Ok(bytes) => {
                            if ws_sender.send(Message::Binary(bytes.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            log::error!("Dropping unencodable frame: {e}");
                            if let Some(id) = frame.id() {
                                self.resolve(id, Err(e.into()));
                            }
                        }
                    }
                }
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        match ServerFrame::decode(&bytes) {
                            Ok(frame) => self.handle_frame(frame),
                            Err(e) => log::warn!("Ignoring undecodable frame from {}: {e}", self.url),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("WebSocket error from {}: {e}", self.url);
                        break;
                    }
                },
            }
        }
    }

    fn handle_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Reply { id, result } => {
                if let Err(e) = &result {
                    if lock(&self.subs).contains_key(&id) && !lock(&self.pending).contains_key(&id) {
                        log::warn!("Resubscribe #{id} rejected: {e}");
                    }
                }
                self.resolve(id, result);
            }
            ServerFrame::Update { subscription, value } => {
                if let Some(entry) = lock(&self.subs).get(&subscription) {
                    entry.latest.send_replace(Some(value));
                }
            }
            ServerFrame::Welcome { .. } => log::warn!("Unexpected Welcome from {}", self.url),
        }
    }

    fn resolve(&self, id: u64, result: Result<Reply, StoreError>) {
        if let Some(waiter) = lock(&self.pending).remove(&id) {
            let _ = waiter.send(result);
        }
    }

    fn fail_pending(&self, reason: &str) {
        for (_, waiter) in lock(&self.pending).drain() {
            let _ = waiter.send(Err(StoreError::Unavailable(reason.to_string())));
        }
    }

    fn resubscribe(&self) {
        let Some(outgoing) = lock(&self.outgoing).clone() else {
            return;
        };
        for (id, entry) in lock(&self.subs).iter() {
            let frame = ClientFrame::Subscribe {
                id: *id,
                path: entry.path.clone(),
            };
            if outgoing.try_send(frame).is_err() {
                log::warn!("Could not resubscribe #{id} to {}", entry.path);
            }
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request(&self, build: impl FnOnce(u64) -> ClientFrame) -> Result<Reply, StoreError> {
        self.request_with(self.next_id(), build).await
    }

    async fn request_with(&self, id: u64, build: impl FnOnce(u64) -> ClientFrame) -> Result<Reply, StoreError> {
        let outgoing = lock(&self.outgoing)
            .clone()
            .ok_or_else(|| StoreError::Unavailable(format!("not connected to {}", self.url)))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        if outgoing.send(build(id)).await.is_err() {
            lock(&self.pending).remove(&id);
            return Err(StoreError::Unavailable("connection lost".into()));
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StoreError::Unavailable("connection lost".into())),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(ProtocolError::Timeout.into())
            }
        }
    }

    async fn open_subscription(self: &Arc<Self>, path: &StorePath) -> Result<Subscription, StoreError> {
        let id = self.next_id();
        let (latest, mut latest_rx) = watch::channel::<Option<Option<Value>>>(None);
        let (tx, rx) = mpsc::channel(self.config.subscription_buffer.max(1));

        let forwarder = tokio::spawn(async move {
            let mut last: Option<Option<Value>> = None;
            while latest_rx.changed().await.is_ok() {
                let observed = latest_rx.borrow_and_update().clone();
                let Some(value) = observed else { continue };
                if last.as_ref() == Some(&value) {
                    continue;
                }
                if tx.send(value.clone()).await.is_err() {
                    break;
                }
                last = Some(value);
            }
        });
        let forwarder = forwarder.abort_handle();

        lock(&self.subs).insert(
            id,
            SubEntry {
                path: path.clone(),
                latest,
                forwarder: forwarder.clone(),
            },
        );

        let subscribed = self
            .request_with(id, |id| ClientFrame::Subscribe { id, path: path.clone() })
            .await;
        match subscribed {
            Ok(Reply::Subscribed) => {}
            other => {
                lock(&self.subs).remove(&id);
                forwarder.abort();
                return Err(match other {
                    Ok(reply) => unexpected(&reply),
                    Err(e) => e,
                });
            }
        }

        let weak: Weak<Shared> = Arc::downgrade(self);
        let cancel = move || {
            let Some(shared) = weak.upgrade() else { return };
            if let Some(entry) = lock(&shared.subs).remove(&id) {
                entry.forwarder.abort();
            }
            let outgoing = lock(&shared.outgoing).clone();
            if let Some(outgoing) = outgoing {
                let _ = outgoing.try_send(ClientFrame::Unsubscribe { id });
            }
        };
        Ok(Subscription::new(path.clone(), rx, Some(Box::new(cancel))))
    }
}

impl SharedStore for RemoteStore {
    fn identity(&self) -> &UserId {
        &self.shared.identity
    }

    fn get<'a>(&'a self, path: &'a StorePath) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        async move {
            match self.shared.request(|id| ClientFrame::Get { id, path: path.clone() }).await? {
                Reply::Value(value) => Ok(value),
                other => Err(unexpected(&other)),
            }
        }
        .boxed()
    }

    fn apply(&self, batch: WriteBatch) -> BoxFuture<'_, Result<CommitReceipt, StoreError>> {
        async move {
            match self.shared.request(|id| ClientFrame::Apply { id, batch }).await? {
                Reply::Committed(receipt) => Ok(receipt),
                other => Err(unexpected(&other)),
            }
        }
        .boxed()
    }

    fn subscribe<'a>(&'a self, path: &'a StorePath) -> BoxFuture<'a, Result<Subscription, StoreError>> {
        self.shared.open_subscription(path).boxed()
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_testing_config_is_faster() {
        let config = RemoteConfig::for_testing();
        assert!(config.request_timeout < RemoteConfig::default().request_timeout);
        assert!(config.reconnect_initial <= config.reconnect_max);
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = RemoteStore::connect(
            format!("ws://127.0.0.1:{port}"),
            "alice",
            RemoteConfig::for_testing(),
        )
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_poisoned_lock_is_usable() {
        let mutex = Arc::new(Mutex::new(1));
        let poisoner = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert_eq!(*lock(&mutex), 1);
    }
}
