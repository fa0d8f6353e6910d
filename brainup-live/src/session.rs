//! One participant's entry point to live quizzes.

use tokio::sync::watch;

use crate::answer::AnswerCollector;
use crate::catalog::QuestionCatalog;
use crate::config::SessionConfig;
use crate::error::QuizError;
use crate::layout::SessionPaths;
use crate::lobby::LobbyCoordinator;
use crate::model::{QuestionSet, RosterSnapshot, ScoresSnapshot, SessionCode, SessionSnapshot, UserId};
use crate::registry::SessionRegistry;
use crate::round::RoundController;
use crate::store::{ConnectionState, StoreRef};
use crate::terminator::{FinalRanking, SessionTerminator};
use crate::watch::Watch;

/// Every quiz operation, acting as the store handle's identity.
///
/// ```no_run
/// # use brainup_live::{MemoryStore, QuizClient, SessionConfig, QuestionSet, Question};
/// # async fn demo() -> Result<(), brainup_live::QuizError> {
/// let store = MemoryStore::new();
/// let host = QuizClient::new(store.handle("alice"), SessionConfig::default());
/// let set = QuestionSet::new("Capitals", vec![Question::new("France?", ["Paris", "Rome"], 0)]);
/// let set_ref = host.publish_question_set(&set).await?;
/// let code = host.create_session(&set_ref).await?;
///
/// let player = QuizClient::new(store.handle("bob"), SessionConfig::default());
/// player.join(&code, "Bob").await?;
/// host.start(&code).await?;
/// # Ok(())
/// # }
/// ```
pub struct QuizClient {
    store: StoreRef,
    config: SessionConfig,
    catalog: QuestionCatalog,
    registry: SessionRegistry,
    lobby: LobbyCoordinator,
    terminator: SessionTerminator,
}

impl QuizClient {
    pub fn new(store: StoreRef, config: SessionConfig) -> Self {
        Self {
            catalog: QuestionCatalog::new(store.clone(), config.retry.clone()),
            registry: SessionRegistry::new(store.clone(), config.clone()),
            lobby: LobbyCoordinator::new(store.clone(), config.clone()),
            terminator: SessionTerminator::new(store.clone(), config.clone()),
            store,
            config,
        }
    }

    pub fn identity(&self) -> &UserId {
        self.store.identity()
    }

    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.store.connection()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ─── Question sets ────────────────────────────────────────────────

    pub async fn publish_question_set(&self, set: &QuestionSet) -> Result<String, QuizError> {
        self.catalog.publish(set).await
    }

    pub async fn read_question_set(&self, set_ref: &str) -> Result<QuestionSet, QuizError> {
        self.catalog.read(set_ref).await
    }

    // ─── Lobby ────────────────────────────────────────────────────────

    /// Host a new session of `question_set_ref`.
    pub async fn create_session(&self, question_set_ref: &str) -> Result<SessionCode, QuizError> {
        self.registry
            .create_session(self.identity(), question_set_ref)
            .await
    }

    pub async fn session(&self, code: &SessionCode) -> Result<SessionSnapshot, QuizError> {
        self.registry.lookup(code).await
    }

    pub async fn join(&self, code: &SessionCode, display_name: &str) -> Result<String, QuizError> {
        self.lobby.join(code, self.identity(), display_name).await
    }

    pub async fn start(&self, code: &SessionCode) -> Result<(), QuizError> {
        self.lobby.start(code, self.identity()).await
    }

    pub async fn watch_roster(&self, code: &SessionCode) -> Result<Watch<RosterSnapshot>, QuizError> {
        self.lobby.watch_roster(code).await
    }

    pub async fn watch_started(&self, code: &SessionCode) -> Result<Watch<bool>, QuizError> {
        self.lobby.watch_started(code).await
    }

    pub async fn wait_for_start(&self, code: &SessionCode) -> Result<QuestionSet, QuizError> {
        self.lobby.wait_for_start(code).await
    }

    // ─── Rounds ───────────────────────────────────────────────────────

    /// Host only.
    pub async fn round_controller(&self, code: &SessionCode) -> Result<RoundController, QuizError> {
        RoundController::attach(self.store.clone(), self.config.clone(), code).await
    }

    pub async fn answer_collector(&self, code: &SessionCode) -> Result<AnswerCollector, QuizError> {
        AnswerCollector::attach(self.store.clone(), self.config.clone(), code).await
    }

    pub async fn watch_current_question(&self, code: &SessionCode) -> Result<Watch<Option<u32>>, QuizError> {
        Watch::open(&self.store, SessionPaths::new(code).current_question_index()).await
    }

    pub async fn watch_session(&self, code: &SessionCode) -> Result<Watch<SessionSnapshot>, QuizError> {
        Watch::open(&self.store, SessionPaths::new(code).root()).await
    }

    // ─── End ──────────────────────────────────────────────────────────

    pub async fn watch_scores(&self, code: &SessionCode) -> Result<Watch<ScoresSnapshot>, QuizError> {
        self.terminator.watch_scores(code).await
    }

    pub async fn watch_finished(&self, code: &SessionCode) -> Result<Watch<bool>, QuizError> {
        self.terminator.watch_finished(code).await
    }

    pub async fn await_final_ranking(&self, code: &SessionCode) -> Result<FinalRanking, QuizError> {
        self.terminator.await_final_ranking(code).await
    }

    pub async fn final_ranking(&self, code: &SessionCode) -> Result<FinalRanking, QuizError> {
        self.terminator.final_ranking(code).await
    }
}
