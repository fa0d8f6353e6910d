//! Participant-side rounds: one answer per question, scored atomically.
//!
//! A submission is one conditional batch:
//!
//! ```text
//! require currentQuestionIndex == i     (round still current)
//! require finished == false
//! require answers/i/{me} absent         (one claim per round)
//! require scores/{me} == s              (only when correct)
//! set     answers/i/{me} = { correct, option }
//! set     scores/{me}    = s + 1        (only when correct)
//! ```
//!
//! so a score moves by exactly one per correct answer no matter how the
//! submission races the host advancing or the participant's other devices.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::catalog::QuestionCatalog;
use crate::config::SessionConfig;
use crate::countdown::Countdown;
use crate::error::QuizError;
use crate::layout::SessionPaths;
use crate::lease::{HostLease, LeaseStatus};
use crate::model::{
    AnswerRecord, FromStoreValue, QuestionSet, SessionCode, SessionPhase, SessionSnapshot, UserId,
};
use crate::registry::read_session;
use crate::retry::with_backoff;
use crate::store::{ConnectionState, StoreError, StorePath, StoreRef, Value, WriteBatch};
use crate::terminator::{rank_standings, Standing};
use crate::watch::Watch;

/// What happened to a submitted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Correct { score: u32 },
    Incorrect,
    /// The round had already moved on; nothing was recorded.
    Stale,
    /// This identity already answered the round.
    AlreadyAnswered,
}

/// The question currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub index: u32,
    pub total: usize,
    pub text: String,
    pub options: Vec<String>,
}

/// Everything a participant's screen shows, derived from one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantView {
    pub phase: SessionPhase,
    pub question: Option<QuestionView>,
    pub answered: bool,
    pub my_answer: Option<AnswerRecord>,
    /// Whole seconds left on the local countdown
    pub time_left: Option<u32>,
    /// Answers are accepted: a round is active, time remains and none was given
    pub can_answer: bool,
    pub my_score: u32,
    pub standings: Vec<Standing>,
    pub host: LeaseStatus,
    pub reconnecting: bool,
    pub is_host: bool,
}

pub struct AnswerCollector {
    store: StoreRef,
    config: SessionConfig,
    code: SessionCode,
    paths: SessionPaths,
    host: UserId,
    questions: Arc<QuestionSet>,
    submitted: HashSet<u32>,
    countdown: Option<(u32, Countdown)>,
    lease: HostLease,
    connection: watch::Receiver<ConnectionState>,
}

impl AnswerCollector {
    /// Bind to a session. Reads the question set once.
    pub async fn attach(store: StoreRef, config: SessionConfig, code: &SessionCode) -> Result<Self, QuizError> {
        let session = read_session(&store, &config, code).await?;
        let questions = QuestionCatalog::new(store.clone(), config.retry.clone())
            .read(&session.question_set_ref)
            .await?;
        let connection = store.connection();
        Ok(Self {
            lease: HostLease::new(config.host_lease),
            paths: SessionPaths::new(code),
            code: code.clone(),
            host: session.host_id,
            questions: Arc::new(questions),
            submitted: HashSet::new(),
            countdown: None,
            connection,
            store,
            config,
        })
    }

    pub fn identity(&self) -> &UserId {
        self.store.identity()
    }

    pub fn is_host(&self) -> bool {
        self.store.identity() == &self.host
    }

    pub fn questions(&self) -> &QuestionSet {
        &self.questions
    }

    /// Full session feed, to be passed to [`observe`](Self::observe).
    pub async fn watch_session(&self) -> Result<Watch<SessionSnapshot>, QuizError> {
        Watch::open(&self.store, self.paths.root()).await
    }

    /// Submit `choice` for round `index`. `None` records a timed-out round.
    ///
    /// The first call per round is final; later calls return
    /// `AlreadyAnswered` without touching the store. Answers for a round
    /// that already ended are dropped and reported as `Stale`.
    pub async fn submit_answer(&mut self, index: u32, choice: Option<usize>) -> Result<SubmitOutcome, QuizError> {
        if self.is_host() {
            return Err(QuizError::Unauthorized("the host does not answer".into()));
        }
        if self.submitted.contains(&index) {
            log::debug!("{} already answered round {index} of {}", self.identity(), self.code);
            return Ok(SubmitOutcome::AlreadyAnswered);
        }
        let question = self
            .questions
            .get(index)
            .ok_or(QuizError::InvalidQuestionIndex(index))?;
        let record = AnswerRecord {
            correct: question.is_correct(choice),
            option: choice,
        };

        match self.try_submit(index, record).await {
            Ok(SubmitOutcome::Stale) => Ok(SubmitOutcome::Stale),
            Ok(outcome) => {
                self.submitted.insert(index);
                log::debug!("{} answered round {index} of {}: {outcome:?}", self.identity(), self.code);
                Ok(outcome)
            }
            Err(QuizError::StaleSubmission { submitted, current }) => {
                log::debug!(
                    "Dropping stale answer from {} for round {submitted} (current: {current:?})",
                    self.identity()
                );
                Ok(SubmitOutcome::Stale)
            }
            Err(e) => Err(e),
        }
    }

    async fn progress(&self) -> Result<(Option<u32>, bool), QuizError> {
        let index_path = self.paths.current_question_index();
        let finished_path = self.paths.finished();
        let index = with_backoff(&self.config.retry, "read round", || self.store.get(&index_path)).await?;
        let finished = with_backoff(&self.config.retry, "read round", || self.store.get(&finished_path)).await?;
        Ok((
            Option::<u32>::from_store_value(&index_path, index.as_ref())?,
            bool::from_store_value(&finished_path, finished.as_ref())?,
        ))
    }

    async fn ensure_current(&self, index: u32) -> Result<(), QuizError> {
        match self.progress().await? {
            (Some(current), false) if current == index => Ok(()),
            (current, _) => Err(QuizError::StaleSubmission {
                submitted: index,
                current,
            }),
        }
    }

    async fn try_submit(&self, index: u32, record: AnswerRecord) -> Result<SubmitOutcome, QuizError> {
        let me = self.store.identity().clone();
        let answer_path = self.paths.answer(index, &me);
        let score_path = self.paths.score(&me);

        for attempt in 1..=self.config.retry.max_attempts.max(1) {
            self.ensure_current(index).await?;

            let mut batch = WriteBatch::new()
                .require_eq(self.paths.finished(), Some(Value::Bool(false)))
                .require_eq(self.paths.current_question_index(), Some(Value::from(index)))
                .require_absent(answer_path.clone())
                .set(answer_path.clone(), record.to_value());

            let mut new_score = None;
            if record.correct {
                let current = with_backoff(&self.config.retry, "read score", || self.store.get(&score_path)).await?;
                let tally = current.as_ref().and_then(Value::as_int).unwrap_or(0);
                batch = batch
                    .require_eq(score_path.clone(), current)
                    .set(score_path.clone(), tally + 1);
                new_score = Some(u32::try_from(tally + 1).unwrap_or(u32::MAX));
            }

            match with_backoff(&self.config.retry, "submit answer", || self.store.apply(batch.clone())).await {
                Ok(_) => {
                    return Ok(match new_score {
                        Some(score) => SubmitOutcome::Correct { score },
                        None => SubmitOutcome::Incorrect,
                    })
                }
                Err(StoreError::ConditionFailed { path }) => {
                    log::debug!("Answer for round {index} hit a guard at {path} (attempt {attempt})");
                    if let Some(existing) = self.store.get(&answer_path).await? {
                        return self.settle_existing(&answer_path, &existing, record).await;
                    }
                    // round moved on, or our score changed under us; re-check and retry
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(QuizError::Store(StoreError::ConditionFailed {
            path: score_path.to_string(),
        }))
    }

    /// An answer is already recorded. If it is ours (a retried write whose
    /// first attempt landed) report it; otherwise the round was taken.
    async fn settle_existing(
        &self,
        answer_path: &StorePath,
        existing: &Value,
        record: AnswerRecord,
    ) -> Result<SubmitOutcome, QuizError> {
        let stored = Option::<AnswerRecord>::from_store_value(answer_path, Some(existing))?;
        if stored != Some(record) {
            return Ok(SubmitOutcome::AlreadyAnswered);
        }
        if !record.correct {
            return Ok(SubmitOutcome::Incorrect);
        }
        let score_path = self.paths.score(self.store.identity());
        let score = self.store.get(&score_path).await?;
        let score = score
            .as_ref()
            .and_then(Value::as_int)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        Ok(SubmitOutcome::Correct { score })
    }

    /// Derive the participant's screen from a session snapshot.
    ///
    /// Starts a fresh local countdown whenever a new round index is seen
    /// and drops it outside of rounds.
    pub fn observe(&mut self, session: &SessionSnapshot) -> ParticipantView {
        let me = self.store.identity().clone();
        let phase = session.phase();

        let question = match phase {
            SessionPhase::Question(index) => {
                let restart = !matches!(&self.countdown, Some((current, _)) if *current == index);
                if restart {
                    let secs = self.questions.round_secs(index, self.config.default_round_secs);
                    self.countdown = Some((index, Countdown::start(std::time::Duration::from_secs(u64::from(secs)))));
                }
                self.questions.get(index).map(|q| QuestionView {
                    index,
                    total: self.questions.len(),
                    text: q.text.clone(),
                    options: q.options.clone(),
                })
            }
            SessionPhase::Lobby | SessionPhase::Finished => {
                self.countdown = None;
                None
            }
        };

        let my_answer = match phase {
            SessionPhase::Question(index) => session.answer(index, &me).copied(),
            _ => None,
        };
        let time_left = self.countdown.as_ref().map(|(_, c)| c.remaining());
        let is_host = me == self.host;
        let can_answer = !is_host
            && question.is_some()
            && my_answer.is_none()
            && time_left.is_some_and(|secs| secs > 0);

        ParticipantView {
            phase,
            question,
            answered: my_answer.is_some(),
            my_answer,
            time_left,
            can_answer,
            my_score: session.scores.score_of(&me),
            standings: rank_standings(&session.roster, &session.scores),
            host: self.lease.evaluate_now(session.host_heartbeat),
            reconnecting: *self.connection.borrow() != ConnectionState::Connected,
            is_host,
        }
    }

    /// Local countdown for the round being shown, if any.
    pub fn countdown(&self) -> Option<&Countdown> {
        self.countdown.as_ref().map(|(_, c)| c)
    }

    /// Stop the local countdown.
    pub fn close(&mut self) {
        self.countdown = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::LobbyCoordinator;
    use crate::model::Question;
    use crate::registry::SessionRegistry;
    use crate::round::RoundController;
    use crate::store::MemoryStore;

    async fn started_session(store: &MemoryStore) -> SessionCode {
        let host = store.handle("alice");
        let config = SessionConfig::for_testing();
        let set = QuestionSet::new(
            "Quiz",
            vec![
                Question::new("1+1?", ["1", "2"], 1),
                Question::new("2+2?", ["4", "5"], 0),
            ],
        );
        let set_ref = QuestionCatalog::new(host.clone(), config.retry.clone())
            .publish(&set)
            .await
            .unwrap();
        let code = SessionRegistry::new(host.clone(), config.clone())
            .create_session(&UserId::new("alice"), &set_ref)
            .await
            .unwrap();
        for who in ["bob", "carol"] {
            LobbyCoordinator::new(store.handle(who), config.clone())
                .join(&code, &UserId::new(who), who)
                .await
                .unwrap();
        }
        LobbyCoordinator::new(host, config)
            .start(&code, &UserId::new("alice"))
            .await
            .unwrap();
        code
    }

    async fn collector(store: &MemoryStore, who: &str, code: &SessionCode) -> AnswerCollector {
        AnswerCollector::attach(store.handle(who), SessionConfig::for_testing(), code)
            .await
            .unwrap()
    }

    async fn score(store: &MemoryStore, code: &SessionCode, who: &str) -> Option<Value> {
        store
            .snapshot(&SessionPaths::new(code).score(&UserId::new(who)))
            .await
    }

    #[tokio::test]
    async fn test_correct_answer_scores_once() {
        let store = MemoryStore::new();
        let code = started_session(&store).await;
        let mut bob = collector(&store, "bob", &code).await;

        assert_eq!(bob.submit_answer(0, Some(1)).await.unwrap(), SubmitOutcome::Correct { score: 1 });
        assert_eq!(bob.submit_answer(0, Some(1)).await.unwrap(), SubmitOutcome::AlreadyAnswered);
        assert_eq!(score(&store, &code, "bob").await, Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn test_incorrect_answer_leaves_score_absent() {
        let store = MemoryStore::new();
        let code = started_session(&store).await;
        let mut carol = collector(&store, "carol", &code).await;

        assert_eq!(carol.submit_answer(0, Some(0)).await.unwrap(), SubmitOutcome::Incorrect);
        assert_eq!(score(&store, &code, "carol").await, None);
    }

    #[tokio::test]
    async fn test_timed_out_round_is_incorrect() {
        let store = MemoryStore::new();
        let code = started_session(&store).await;
        let mut carol = collector(&store, "carol", &code).await;
        assert_eq!(carol.submit_answer(0, None).await.unwrap(), SubmitOutcome::Incorrect);
    }

    #[tokio::test]
    async fn test_host_cannot_answer() {
        let store = MemoryStore::new();
        let code = started_session(&store).await;
        let mut alice = collector(&store, "alice", &code).await;
        assert!(alice.is_host());
        assert!(matches!(
            alice.submit_answer(0, Some(1)).await,
            Err(QuizError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_answer_is_dropped() {
        let store = MemoryStore::new();
        let code = started_session(&store).await;
        let mut bob = collector(&store, "bob", &code).await;
        let mut host = RoundController::attach(store.handle("alice"), SessionConfig::for_testing(), &code)
            .await
            .unwrap();
        host.advance().await.unwrap();

        assert_eq!(bob.submit_answer(0, Some(1)).await.unwrap(), SubmitOutcome::Stale);
        assert_eq!(score(&store, &code, "bob").await, None);
        // the current round still accepts an answer
        assert_eq!(bob.submit_answer(1, Some(0)).await.unwrap(), SubmitOutcome::Correct { score: 1 });
    }

    #[tokio::test]
    async fn test_second_device_cannot_double_score() {
        let store = MemoryStore::new();
        let code = started_session(&store).await;
        let mut phone = collector(&store, "bob", &code).await;
        let mut laptop = collector(&store, "bob", &code).await;

        assert_eq!(phone.submit_answer(0, Some(1)).await.unwrap(), SubmitOutcome::Correct { score: 1 });
        // identical answer from another device reports the recorded result
        assert_eq!(laptop.submit_answer(0, Some(1)).await.unwrap(), SubmitOutcome::Correct { score: 1 });
        let mut tablet = collector(&store, "bob", &code).await;
        assert_eq!(tablet.submit_answer(0, Some(0)).await.unwrap(), SubmitOutcome::AlreadyAnswered);
        assert_eq!(score(&store, &code, "bob").await, Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = MemoryStore::new();
        let code = started_session(&store).await;
        let mut bob = collector(&store, "bob", &code).await;
        store.fail_next_writes(2);
        assert_eq!(bob.submit_answer(0, Some(1)).await.unwrap(), SubmitOutcome::Correct { score: 1 });
    }

    #[tokio::test]
    async fn test_invalid_index() {
        let store = MemoryStore::new();
        let code = started_session(&store).await;
        let mut bob = collector(&store, "bob", &code).await;
        assert_eq!(
            bob.submit_answer(9, Some(0)).await.unwrap_err(),
            QuizError::InvalidQuestionIndex(9)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_tracks_rounds() {
        let store = MemoryStore::new();
        let code = started_session(&store).await;
        let mut bob = collector(&store, "bob", &code).await;
        let mut feed = bob.watch_session().await.unwrap();

        let session = feed.next().await.unwrap().unwrap();
        let view = bob.observe(&session);
        assert_eq!(view.phase, SessionPhase::Question(0));
        assert_eq!(view.question.as_ref().unwrap().text, "1+1?");
        assert_eq!(view.time_left, Some(2));
        assert!(view.can_answer);
        assert!(!view.is_host);

        bob.submit_answer(0, Some(1)).await.unwrap();
        let session = read_session(&store.handle("bob"), &SessionConfig::for_testing(), &code)
            .await
            .unwrap();
        let view = bob.observe(&session);
        assert!(view.answered);
        assert!(!view.can_answer);
        assert_eq!(view.my_score, 1);
        assert_eq!(view.standings[0].identity, UserId::new("bob"));

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        let view = bob.observe(&session);
        assert_eq!(view.time_left, Some(0));
    }
}
