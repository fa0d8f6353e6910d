//! Wire protocol between [`RemoteStore`](crate::client::RemoteStore) and
//! [`StoreServer`](crate::server::StoreServer).
//!
//! Every WebSocket binary message carries one bincode-encoded frame:
//!
//! ```text
//!  client                                   server
//!    │ ── Hello{identity, client_id} ───────► │
//!    │ ◄────────────── Welcome{revision} ──── │
//!    │ ── Get / Apply / Subscribe{id} ──────► │
//!    │ ◄─────────── Reply{id, result} ─────── │
//!    │ ◄──── Update{subscription, value} ──── │   (after Subscribe)
//! ```
//!
//! Request ids are chosen by the client and echoed in the reply; a
//! subscription is addressed by the id of the `Subscribe` request that
//! opened it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{CommitReceipt, StoreError, StorePath, UserId, Value, WriteBatch};

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Must be the first frame on a connection.
    Hello { identity: UserId, client_id: Uuid },
    Get { id: u64, path: StorePath },
    Apply { id: u64, batch: WriteBatch },
    Subscribe { id: u64, path: StorePath },
    Unsubscribe { id: u64 },
    Ping { id: u64 },
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    Welcome { client_id: Uuid, revision: u64 },
    Reply { id: u64, result: Result<Reply, StoreError> },
    Update { subscription: u64, value: Option<Value> },
}

/// Successful outcome of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Value(Option<Value>),
    Committed(CommitReceipt),
    Subscribed,
    Unsubscribed,
    Pong,
}

impl ClientFrame {
    /// Request id, `None` for the handshake.
    pub fn id(&self) -> Option<u64> {
        match self {
            ClientFrame::Hello { .. } => None,
            ClientFrame::Get { id, .. }
            | ClientFrame::Apply { id, .. }
            | ClientFrame::Subscribe { id, .. }
            | ClientFrame::Unsubscribe { id }
            | ClientFrame::Ping { id } => Some(*id),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl ServerFrame {
    pub fn reply(id: u64, result: Result<Reply, StoreError>) -> Self {
        ServerFrame::Reply { id, result }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(frame, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(frame)
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// A request arrived before `Hello`.
    HandshakeRequired,
    /// The peer answered with a frame that does not fit the request.
    UnexpectedFrame(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::HandshakeRequired => write!(f, "Handshake required"),
            Self::UnexpectedFrame(e) => write!(f, "Unexpected frame: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for StoreError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::ConnectionClosed | ProtocolError::Timeout => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Protocol(other.to_string()),
        }
    }
}
