//! Pre-start phase: participants join, the host starts.
//!
//! ```text
//!  participant ── join ──► roster/{entryKey}  (only while started == false)
//!  host ───────── start ─► started = true, currentQuestionIndex = 0
//!  everyone ◄──── watch_started ── flips once, then each client reads the
//!                                  question set a single time
//! ```

use crate::catalog::QuestionCatalog;
use crate::config::SessionConfig;
use crate::error::QuizError;
use crate::layout::{self, SessionPaths};
use crate::lease::now_millis;
use crate::model::{new_entry_key, roster_entry_value, QuestionSet, RosterSnapshot, SessionCode, UserId};
use crate::registry::read_session;
use crate::retry::with_backoff;
use crate::store::{StoreError, StoreRef, Value, WriteBatch};
use crate::watch::Watch;

pub struct LobbyCoordinator {
    store: StoreRef,
    config: SessionConfig,
    catalog: QuestionCatalog,
}

impl LobbyCoordinator {
    pub fn new(store: StoreRef, config: SessionConfig) -> Self {
        let catalog = QuestionCatalog::new(store.clone(), config.retry.clone());
        Self {
            store,
            config,
            catalog,
        }
    }

    /// Add `identity` to the roster. Returns the new entry's id.
    ///
    /// The roster write is conditioned on the session still being in its
    /// lobby, so a join racing the host's start either lands before the
    /// start or fails with `AlreadyStarted`. Joining twice adds a second
    /// entry.
    pub async fn join(&self, code: &SessionCode, identity: &UserId, display_name: &str) -> Result<String, QuizError> {
        if identity != self.store.identity() {
            return Err(QuizError::Unauthorized(format!(
                "{} cannot join as {identity}",
                self.store.identity()
            )));
        }

        let session = read_session(&self.store, &self.config, code).await?;
        if session.started {
            log::info!("{identity} tried to join {code} after it started");
            return Err(QuizError::AlreadyStarted(code.clone()));
        }

        let paths = SessionPaths::new(code);
        let joined_at = now_millis();
        let entry_id = new_entry_key(joined_at);
        let entry_path = paths.roster().child(&entry_id);
        let batch = WriteBatch::new()
            .require_present(paths.host_id())
            .require_eq(paths.started(), Some(Value::Bool(false)))
            .require_absent(entry_path.clone())
            .set(entry_path.clone(), roster_entry_value(identity, display_name, joined_at));

        match with_backoff(&self.config.retry, "join session", || self.store.apply(batch.clone())).await {
            Ok(_) => {
                log::info!("{identity} joined {code} as entry {entry_id}");
                Ok(entry_id)
            }
            Err(StoreError::ConditionFailed { .. }) => {
                // An earlier attempt may have committed before its reply was lost
                let landed = self.store.get(&entry_path).await?;
                let owner = landed
                    .as_ref()
                    .and_then(|v| v.child(layout::PARTICIPANT_IDENTITY))
                    .and_then(Value::as_str);
                if owner == Some(identity.as_str()) {
                    log::info!("{identity} joined {code} as entry {entry_id} (confirmed after retry)");
                    return Ok(entry_id);
                }
                let session = read_session(&self.store, &self.config, code).await?;
                log::info!("{identity} lost the join race for {code} (started: {})", session.started);
                Err(QuizError::AlreadyStarted(code.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move the session out of its lobby. Host only; repeated calls are no-ops.
    pub async fn start(&self, code: &SessionCode, caller: &UserId) -> Result<(), QuizError> {
        if caller != self.store.identity() {
            return Err(QuizError::Unauthorized(format!(
                "{} cannot act as {caller}",
                self.store.identity()
            )));
        }

        let session = read_session(&self.store, &self.config, code).await?;
        if &session.host_id != caller {
            return Err(QuizError::Unauthorized(format!("only the host of {code} may start it")));
        }
        if session.started {
            log::debug!("Session {code} already started");
            return Ok(());
        }
        let joined = session.players().len();
        if joined < self.config.min_participants {
            return Err(QuizError::NotEnoughPlayers {
                required: self.config.min_participants,
                joined,
            });
        }

        let paths = SessionPaths::new(code);
        let batch = WriteBatch::new()
            .require_eq(paths.started(), Some(Value::Bool(false)))
            .set(paths.started(), true)
            .set(paths.current_question_index(), 0u32);

        match with_backoff(&self.config.retry, "start session", || self.store.apply(batch.clone())).await {
            Ok(_) => {
                log::info!("Session {code} started with {joined} participant(s)");
                Ok(())
            }
            Err(StoreError::ConditionFailed { .. }) => {
                log::debug!("Session {code} was started concurrently");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn watch_roster(&self, code: &SessionCode) -> Result<Watch<RosterSnapshot>, QuizError> {
        Watch::open(&self.store, SessionPaths::new(code).roster()).await
    }

    pub async fn watch_started(&self, code: &SessionCode) -> Result<Watch<bool>, QuizError> {
        Watch::open(&self.store, SessionPaths::new(code).started()).await
    }

    /// Block until the host starts, then read the question set once.
    pub async fn wait_for_start(&self, code: &SessionCode) -> Result<QuestionSet, QuizError> {
        let mut started = self.watch_started(code).await?;
        started.wait_for(|started| *started).await?;
        started.unsubscribe();

        let session = read_session(&self.store, &self.config, code).await?;
        self.catalog.read(&session.question_set_ref).await
    }
}
