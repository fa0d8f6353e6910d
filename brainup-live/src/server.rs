//! WebSocket front end for a shared [`MemoryStore`].
//!
//! Architecture:
//! ```text
//!  ┌──────────┐     ┌───────────────────────────────────────┐
//!  │ Remote A │◄───►│ connection A ─► MemoryClient("alice") │
//!  └──────────┘     │      ▲ Update frames                  │
//!  ┌──────────┐     │      │        ┌────────────────┐      │
//!  │ Remote B │◄───►│ connection B ─┤  MemoryStore   │      │
//!  └──────────┘     │               │ rules + feed   │      │
//!                   │               │ (+ RocksDB)    │      │
//!                   │               └────────────────┘      │
//!                   └───────────────────────────────────────┘
//! ```
//!
//! Each connection binds to the identity named in its `Hello` frame and
//! executes requests in arrival order. Subscriptions are forwarded by one
//! task each and torn down with the connection.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientFrame, ProtocolError, Reply, ServerFrame};
use crate::store::{MemoryClient, MemoryStore, SharedStore, StoreConfig, StoreError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:9090")
    pub bind_addr: String,
    /// Frames buffered per connection before the writer applies backpressure
    pub outgoing_capacity: usize,
    /// Path for persistent storage (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outgoing_capacity: 256,
            storage_path: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub active_subscriptions: u64,
    pub rejected_writes: u64,
}

pub struct StoreServer {
    config: ServerConfig,
    store: MemoryStore,
    stats: Arc<RwLock<ServerStats>>,
    shutdown: watch::Sender<bool>,
}

impl StoreServer {
    /// Create a server over a fresh store, persistent when
    /// `storage_path` is set.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store = match &config.storage_path {
            Some(path) => MemoryStore::open_persistent(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?,
            None => MemoryStore::new(),
        };
        Ok(Self::with_store(config, store))
    }

    /// Serve an existing store.
    pub fn with_store(config: ServerConfig, store: MemoryStore) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            store,
            stats: Arc::new(RwLock::new(ServerStats::default())),
            shutdown,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Stop accepting and close every open connection.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Bind `bind_addr` and serve until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Store server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown.changed() => {
                    log::info!("Store server shutting down");
                    return Ok(());
                }
            };
            log::debug!("New TCP connection from {addr}");

            let store = self.store.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            let shutdown = self.shutdown.subscribe();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, store, stats, config, shutdown).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        store: MemoryStore,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Writer task: every frame for this peer goes through one channel
        let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(config.outgoing_capacity.max(1));
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let encoded = match frame.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::error!("Dropping unencodable frame: {e}");
                        continue;
                    }
                };
                if ws_sender.send(Message::Binary(encoded.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut subscriptions: HashMap<u64, JoinHandle<()>> = HashMap::new();
        let result = async {
            let client = match Self::await_hello(&mut ws_receiver, &store, &stats, &out_tx).await? {
                Some(client) => client,
                None => return Ok(()),
            };
            log::info!("Connection from {addr} bound to {}", client.identity());

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let frame = Self::decode_counted(&bytes, &stats).await?;
                            Self::dispatch(frame, &client, &stats, &out_tx, &mut subscriptions).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    },
                    _ = shutdown.changed() => break,
                }
            }
            log::info!("{} disconnected from {addr}", client.identity());
            Ok::<(), BoxError>(())
        }
        .await;

        let closed = subscriptions.len() as u64;
        for (_, task) in subscriptions.drain() {
            task.abort();
        }
        drop(out_tx);
        let _ = writer.await;

        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_subscriptions = s.active_subscriptions.saturating_sub(closed);
        }

        result
    }

    /// Wait for the `Hello` frame; anything else first ends the connection.
    async fn await_hello<S>(
        ws_receiver: &mut S,
        store: &MemoryStore,
        stats: &Arc<RwLock<ServerStats>>,
        out_tx: &mpsc::Sender<ServerFrame>,
    ) -> Result<Option<MemoryClient>, BoxError>
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let bytes: Vec<u8> = data.into();
                    match Self::decode_counted(&bytes, stats).await? {
                        ClientFrame::Hello { identity, client_id } => {
                            let client = store.connect(identity);
                            let welcome = ServerFrame::Welcome {
                                client_id,
                                revision: store.revision(),
                            };
                            out_tx.send(welcome).await.map_err(|_| ProtocolError::ConnectionClosed)?;
                            return Ok(Some(client));
                        }
                        other => {
                            if let Some(id) = other.id() {
                                let reply = ServerFrame::reply(
                                    id,
                                    Err(StoreError::from(ProtocolError::HandshakeRequired)),
                                );
                                let _ = out_tx.send(reply).await;
                            }
                            return Err(ProtocolError::HandshakeRequired.into());
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn decode_counted(bytes: &[u8], stats: &Arc<RwLock<ServerStats>>) -> Result<ClientFrame, ProtocolError> {
        let frame = ClientFrame::decode(bytes)?;
        let mut s = stats.write().await;
        s.total_frames += 1;
        s.total_bytes += bytes.len() as u64;
        Ok(frame)
    }

    async fn dispatch(
        frame: ClientFrame,
        client: &MemoryClient,
        stats: &Arc<RwLock<ServerStats>>,
        out_tx: &mpsc::Sender<ServerFrame>,
        subscriptions: &mut HashMap<u64, JoinHandle<()>>,
    ) {
        let reply = match frame {
            ClientFrame::Hello { identity, .. } => {
                log::warn!("Ignoring repeated Hello from {} (as {identity})", client.identity());
                return;
            }
            ClientFrame::Get { id, path } => ServerFrame::reply(id, client.get(&path).await.map(Reply::Value)),
            ClientFrame::Apply { id, batch } => {
                let result = client.apply(batch).await;
                if let Err(StoreError::PermissionDenied { .. }) = &result {
                    stats.write().await.rejected_writes += 1;
                }
                ServerFrame::reply(id, result.map(Reply::Committed))
            }
            ClientFrame::Subscribe { id, path } => match client.subscribe(&path).await {
                Ok(mut subscription) => {
                    // Reply first: the initial value must follow `Subscribed`
                    if out_tx.send(ServerFrame::reply(id, Ok(Reply::Subscribed))).await.is_err() {
                        return;
                    }
                    let out = out_tx.clone();
                    let task = tokio::spawn(async move {
                        while let Some(value) = subscription.next().await {
                            let update = ServerFrame::Update {
                                subscription: id,
                                value,
                            };
                            if out.send(update).await.is_err() {
                                break;
                            }
                        }
                    });
                    if let Some(previous) = subscriptions.insert(id, task) {
                        previous.abort();
                    } else {
                        stats.write().await.active_subscriptions += 1;
                    }
                    log::debug!("{} subscribed to {path} as #{id}", client.identity());
                    return;
                }
                Err(e) => ServerFrame::reply(id, Err(e)),
            },
            ClientFrame::Unsubscribe { id } => {
                if let Some(task) = subscriptions.remove(&id) {
                    task.abort();
                    let mut s = stats.write().await;
                    s.active_subscriptions = s.active_subscriptions.saturating_sub(1);
                }
                ServerFrame::reply(id, Ok(Reply::Unsubscribed))
            }
            ClientFrame::Ping { id } => ServerFrame::reply(id, Ok(Reply::Pong)),
        };
        let _ = out_tx.send(reply).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert!(config.storage_path.is_none());
    }

    #[tokio::test]
    async fn test_new_without_storage_is_volatile() {
        let server = StoreServer::new(ServerConfig::default()).unwrap();
        assert!(!server.store().is_persistent());
        assert_eq!(server.stats().await.total_connections, 0);
    }

    #[tokio::test]
    async fn test_new_with_storage_is_persistent() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_path: Some(dir.path().join("db")),
            ..ServerConfig::default()
        };
        let server = StoreServer::new(config).unwrap();
        assert!(server.store().is_persistent());
    }

    #[tokio::test]
    async fn test_serve_returns_after_shutdown() {
        let server = Arc::new(StoreServer::with_store(ServerConfig::default(), MemoryStore::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let running = server.clone();
        let task = tokio::spawn(async move { running.serve(listener).await.is_ok() });
        server.shutdown();
        let ok = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(ok);
    }
}
