//! Host-side round progression.
//!
//! Only the host runs a `RoundController`. It owns the authoritative
//! countdown; participants mirror it locally but never advance the session.
//!
//! ```text
//!            start                 deadline / all answered
//!   Idle ──────────► Active(0) ──────────► Active(1) ─ … ─► Active(n-1) ──► Finished
//! ```
//!
//! Each transition is a single conditional write (`index == i` for the
//! next round, `finished == false` at the end), so a duplicate controller
//! or a retried write never skips a round or finishes twice.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use crate::catalog::QuestionCatalog;
use crate::config::{AdvancePolicy, SessionConfig};
use crate::countdown::Countdown;
use crate::error::QuizError;
use crate::layout::SessionPaths;
use crate::lease::now_millis;
use crate::model::{QuestionSet, SessionCode, SessionSnapshot};
use crate::registry::read_session;
use crate::retry::with_backoff;
use crate::store::{StoreError, StoreRef, Value, WriteBatch};
use crate::watch::Watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    /// Session still in its lobby.
    Idle,
    Active(u32),
    Finished,
}

impl RoundState {
    fn of(session: &SessionSnapshot) -> Self {
        if session.finished {
            RoundState::Finished
        } else if session.started {
            RoundState::Active(session.current_question_index.unwrap_or(0))
        } else {
            RoundState::Idle
        }
    }
}

pub struct RoundController {
    store: StoreRef,
    config: SessionConfig,
    code: SessionCode,
    paths: SessionPaths,
    questions: Arc<QuestionSet>,
    state: RoundState,
}

impl RoundController {
    /// Bind to a session as its host. Fails for anyone else.
    pub async fn attach(store: StoreRef, config: SessionConfig, code: &SessionCode) -> Result<Self, QuizError> {
        let session = read_session(&store, &config, code).await?;
        if &session.host_id != store.identity() {
            return Err(QuizError::Unauthorized(format!(
                "only the host of {code} runs its rounds"
            )));
        }
        let questions = QuestionCatalog::new(store.clone(), config.retry.clone())
            .read(&session.question_set_ref)
            .await?;

        let state = RoundState::of(&session);
        log::debug!("Round controller attached to {code} in state {state:?}");
        Ok(Self {
            store,
            config,
            code: code.clone(),
            paths: SessionPaths::new(code),
            questions: Arc::new(questions),
            state,
        })
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn questions(&self) -> &QuestionSet {
        &self.questions
    }

    /// Countdown length for round `index`.
    pub fn round_budget(&self, index: u32) -> Duration {
        Duration::from_secs(u64::from(
            self.questions.round_secs(index, self.config.default_round_secs),
        ))
    }

    /// Re-read the session and adopt its state.
    pub async fn resync(&mut self) -> Result<RoundState, QuizError> {
        let session = read_session(&self.store, &self.config, &self.code).await?;
        self.state = RoundState::of(&session);
        Ok(self.state)
    }

    /// Move to the next round, or finish after the last one.
    ///
    /// Calling it on a finished session is a no-op.
    pub async fn advance(&mut self) -> Result<RoundState, QuizError> {
        let index = match self.state {
            RoundState::Idle => return Err(QuizError::NotStarted(self.code.clone())),
            RoundState::Finished => return Ok(RoundState::Finished),
            RoundState::Active(index) => index,
        };

        let total = self.questions.len() as u32;
        let (batch, next) = if index + 1 < total {
            let batch = WriteBatch::new()
                .require_eq(self.paths.finished(), Some(Value::Bool(false)))
                .require_eq(self.paths.current_question_index(), Some(Value::from(index)))
                .set(self.paths.current_question_index(), index + 1);
            (batch, RoundState::Active(index + 1))
        } else {
            let batch = WriteBatch::new()
                .require_eq(self.paths.finished(), Some(Value::Bool(false)))
                .set(self.paths.finished(), true);
            (batch, RoundState::Finished)
        };

        let store = &self.store;
        match with_backoff(&self.config.retry, "advance round", || store.apply(batch.clone())).await {
            Ok(_) => {
                self.state = next;
                match next {
                    RoundState::Finished => log::info!("Session {} finished", self.code),
                    _ => log::info!("Session {} advanced to {next:?}", self.code),
                }
            }
            Err(StoreError::ConditionFailed { .. }) => {
                log::warn!("Session {} moved underneath its controller; resyncing", self.code);
                self.resync().await?;
            }
            Err(e) => {
                log::error!("Host could not advance {}: {e}; the session is stalled", self.code);
                return Err(e.into());
            }
        }
        Ok(self.state)
    }

    async fn beat(&self) {
        if let Err(e) = self.store.set(&self.paths.host_heartbeat(), now_millis()).await {
            log::warn!("Heartbeat for {} failed: {e}", self.code);
        }
    }

    /// Drive rounds until the session finishes or `shutdown` flips.
    ///
    /// Waits for the start if the session is still in its lobby. Returns the
    /// state the controller stopped in.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<RoundState, QuizError> {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let index = match self.state {
                RoundState::Finished => return Ok(RoundState::Finished),
                RoundState::Idle => {
                    let mut started = Watch::<bool>::open(&self.store, self.paths.started()).await?;
                    tokio::select! {
                        result = started.wait_for(|started| *started) => { result?; }
                        _ = shutdown.changed() => return Ok(self.state),
                    }
                    self.resync().await?;
                    continue;
                }
                RoundState::Active(index) => index,
            };

            let budget = self.round_budget(index);
            log::info!("Session {} round {index} running for {budget:?}", self.code);
            let mut countdown = Countdown::start(budget);
            let mut progress = match self.config.advance_policy {
                AdvancePolicy::DeadlineOrAllAnswered => {
                    Some(Watch::<SessionSnapshot>::open(&self.store, self.paths.root()).await?)
                }
                AdvancePolicy::Deadline => None,
            };

            loop {
                tokio::select! {
                    _ = countdown.expired() => {
                        log::debug!("Session {} round {index} deadline reached", self.code);
                        break;
                    }
                    update = next_update(&mut progress) => match update {
                        Some(Ok(session)) if session.all_answered(index) => {
                            log::info!("Session {} round {index}: everyone answered", self.code);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => log::warn!("Ignoring unreadable session update: {e}"),
                        None => progress = None,
                    },
                    _ = heartbeat.tick() => self.beat().await,
                    _ = shutdown.changed() => {
                        log::info!("Round controller for {} stopped in round {index}", self.code);
                        return Ok(self.state);
                    }
                }
            }

            self.advance().await?;
        }
    }

    /// Run on a background task.
    pub fn spawn(self) -> RoundHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        RoundHandle {
            shutdown,
            task: Some(task),
        }
    }
}

async fn next_update(progress: &mut Option<Watch<SessionSnapshot>>) -> Option<Result<SessionSnapshot, QuizError>> {
    match progress {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}

/// A controller running in the background. Dropping it stops the controller.
pub struct RoundHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<Result<RoundState, QuizError>>>,
}

impl RoundHandle {
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the controller and wait for it to wind down.
    pub async fn stop(mut self) -> Result<RoundState, QuizError> {
        let _ = self.shutdown.send(true);
        self.wait().await
    }

    /// Wait for the session to finish (or the controller to fail).
    pub async fn join(mut self) -> Result<RoundState, QuizError> {
        self.wait().await
    }

    async fn wait(&mut self) -> Result<RoundState, QuizError> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| QuizError::TaskFailed(e.to_string()))?,
            None => Err(QuizError::TaskFailed("round controller already joined".into())),
        }
    }
}

impl Drop for RoundHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::LobbyCoordinator;
    use crate::model::{Question, UserId};
    use crate::registry::SessionRegistry;
    use crate::store::MemoryStore;

    async fn session(store: &MemoryStore, questions: usize) -> SessionCode {
        let host = store.handle("alice");
        let set = QuestionSet::new(
            "Quiz",
            (0..questions)
                .map(|i| Question::new(format!("Q{i}"), ["a", "b"], 0).with_time(5))
                .collect(),
        );
        let set_ref = QuestionCatalog::new(host.clone(), SessionConfig::for_testing().retry)
            .publish(&set)
            .await
            .unwrap();
        let code = SessionRegistry::new(host, SessionConfig::for_testing())
            .create_session(&UserId::new("alice"), &set_ref)
            .await
            .unwrap();
        LobbyCoordinator::new(store.handle("bob"), SessionConfig::for_testing())
            .join(&code, &UserId::new("bob"), "Bob")
            .await
            .unwrap();
        code
    }

    async fn start(store: &MemoryStore, code: &SessionCode) {
        LobbyCoordinator::new(store.handle("alice"), SessionConfig::for_testing())
            .start(code, &UserId::new("alice"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_attach_requires_host() {
        let store = MemoryStore::new();
        let code = session(&store, 2).await;
        let err = RoundController::attach(store.handle("bob"), SessionConfig::for_testing(), &code)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, QuizError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_advance_before_start() {
        let store = MemoryStore::new();
        let code = session(&store, 2).await;
        let mut controller = RoundController::attach(store.handle("alice"), SessionConfig::for_testing(), &code)
            .await
            .unwrap();
        assert_eq!(controller.state(), RoundState::Idle);
        assert_eq!(controller.advance().await.unwrap_err(), QuizError::NotStarted(code));
    }

    #[tokio::test]
    async fn test_advance_through_all_rounds() {
        let store = MemoryStore::new();
        let code = session(&store, 3).await;
        start(&store, &code).await;
        let mut controller = RoundController::attach(store.handle("alice"), SessionConfig::for_testing(), &code)
            .await
            .unwrap();

        assert_eq!(controller.state(), RoundState::Active(0));
        assert_eq!(controller.advance().await.unwrap(), RoundState::Active(1));
        assert_eq!(controller.advance().await.unwrap(), RoundState::Active(2));
        assert_eq!(controller.advance().await.unwrap(), RoundState::Finished);

        let revision = store.revision();
        assert_eq!(controller.advance().await.unwrap(), RoundState::Finished);
        assert_eq!(store.revision(), revision);
    }

    #[tokio::test]
    async fn test_duplicate_controllers_never_skip() {
        let store = MemoryStore::new();
        let code = session(&store, 3).await;
        start(&store, &code).await;
        let config = SessionConfig::for_testing();
        let mut first = RoundController::attach(store.handle("alice"), config.clone(), &code).await.unwrap();
        let mut second = RoundController::attach(store.handle("alice"), config, &code).await.unwrap();

        assert_eq!(first.advance().await.unwrap(), RoundState::Active(1));
        // stale view: its conditional write fails and it adopts round 1
        assert_eq!(second.advance().await.unwrap(), RoundState::Active(1));

        let index = store
            .snapshot(&SessionPaths::new(&code).current_question_index())
            .await;
        assert_eq!(index, Some(Value::Int(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_advances_on_deadline() {
        let store = MemoryStore::new();
        let code = session(&store, 2).await;
        let controller = RoundController::attach(store.handle("alice"), SessionConfig::for_testing(), &code)
            .await
            .unwrap();
        assert_eq!(controller.round_budget(0), Duration::from_secs(5));
        let handle = controller.spawn();

        start(&store, &code).await;
        let paths = SessionPaths::new(&code);

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(store.snapshot(&paths.current_question_index()).await, Some(Value::Int(1)));
        assert_eq!(store.snapshot(&paths.finished()).await, Some(Value::Bool(false)));

        assert_eq!(handle.join().await.unwrap(), RoundState::Finished);
        assert_eq!(store.snapshot(&paths.finished()).await, Some(Value::Bool(true)));
        assert!(store.snapshot(&paths.host_heartbeat()).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_progress() {
        let store = MemoryStore::new();
        let code = session(&store, 3).await;
        start(&store, &code).await;
        let controller = RoundController::attach(store.handle("alice"), SessionConfig::for_testing(), &code)
            .await
            .unwrap();
        let handle = controller.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.stop().await.unwrap(), RoundState::Active(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_gives_up_when_store_stays_down() {
        let store = MemoryStore::new();
        let code = session(&store, 2).await;
        start(&store, &code).await;
        let mut controller = RoundController::attach(store.handle("alice"), SessionConfig::for_testing(), &code)
            .await
            .unwrap();
        store.fail_next_writes(100);
        let err = controller.advance().await.unwrap_err();
        assert!(matches!(err, QuizError::StoreUnavailable(_)));
        assert_eq!(controller.state(), RoundState::Active(0));
    }
}
