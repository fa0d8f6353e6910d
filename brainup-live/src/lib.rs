//! # brainup-live: live multi-participant quiz sessions
//!
//! A host publishes a question set, opens a session under a short numeric
//! code, and drives it question by question; participants join by code,
//! answer under a countdown, and see the final ranking. All coordination
//! happens through a shared hierarchical key-value store with atomic
//! conditional batches and per-path subscriptions.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌───────────────────────────────────────────┐
//! │ QuizClient     │──►│ SessionRegistry  LobbyCoordinator         │
//! │ (per identity) │   │ RoundController  AnswerCollector          │
//! └────────────────┘   │ SessionTerminator                         │
//!                      └──────────────────┬────────────────────────┘
//!                                         │ SharedStore
//!                 ┌───────────────────────┴──────────────┐
//!                 ▼                                      ▼
//!         ┌──────────────┐    WebSocket     ┌──────────────────────┐
//!         │ MemoryClient │   RemoteStore ◄─►│ StoreServer          │
//!         └──────┬───────┘                  │ └─► MemoryStore      │
//!                ▼                          │      rules + feed    │
//!         ┌──────────────┐                  │      (+ RocksDB)     │
//!         │ MemoryStore  │                  └──────────────────────┘
//!         └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`store`]: tree values, batches, access rules, in-memory and RocksDB backends
//! - [`protocol`], [`server`], [`client`]: the store over WebSocket
//! - [`registry`], [`lobby`], [`round`], [`answer`], [`terminator`]: session lifecycle
//! - [`session`]: the [`QuizClient`] facade

pub mod answer;
pub mod broadcast;
pub mod catalog;
pub mod client;
pub mod config;
pub mod countdown;
pub mod error;
pub mod layout;
pub mod lease;
pub mod lobby;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod round;
pub mod server;
pub mod session;
pub mod store;
pub mod terminator;
pub mod watch;

// Re-exports for convenience
pub use answer::{AnswerCollector, ParticipantView, QuestionView, SubmitOutcome};
pub use broadcast::{ChangeEvent, ChangeFeed, FeedStats};
pub use catalog::QuestionCatalog;
pub use client::{RemoteConfig, RemoteStore};
pub use config::{AdvancePolicy, RetryPolicy, SessionConfig};
pub use countdown::Countdown;
pub use error::QuizError;
pub use lease::{HostLease, LeaseStatus};
pub use lobby::LobbyCoordinator;
pub use model::{
    AnswerRecord, Participant, Question, QuestionSet, RosterSnapshot, ScoresSnapshot, SessionCode,
    SessionPhase, SessionSnapshot,
};
pub use protocol::{ClientFrame, ProtocolError, Reply, ServerFrame};
pub use registry::SessionRegistry;
pub use round::{RoundController, RoundHandle, RoundState};
pub use server::{ServerConfig, ServerStats, StoreServer};
pub use session::QuizClient;
pub use store::{
    CommitReceipt, Condition, ConnectionState, MemoryClient, MemoryStore, SharedStore, StoreConfig,
    StoreError, StorePath, StoreRef, Subscription, UserId, Value, WriteBatch,
};
pub use terminator::{rank_standings, FinalRanking, SessionTerminator, Standing};
pub use watch::Watch;
