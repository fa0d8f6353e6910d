//! Session creation and lookup by join code.

use crate::catalog::QuestionCatalog;
use crate::config::SessionConfig;
use crate::error::QuizError;
use crate::layout::SessionPaths;
use crate::lease::now_millis;
use crate::model::{new_session_value, FromStoreValue, SessionCode, SessionSnapshot, UserId};
use crate::retry::with_backoff;
use crate::store::{StoreError, StoreRef, WriteBatch};

type CodeGenerator = Box<dyn Fn(u32) -> SessionCode + Send + Sync>;

/// Read a whole session once.
pub(crate) async fn read_session(
    store: &StoreRef,
    config: &SessionConfig,
    code: &SessionCode,
) -> Result<SessionSnapshot, QuizError> {
    let path = SessionPaths::new(code).root();
    let value = with_backoff(&config.retry, "read session", || store.get(&path)).await?;
    SessionSnapshot::from_store_value(&path, value.as_ref())
}

pub struct SessionRegistry {
    store: StoreRef,
    config: SessionConfig,
    catalog: QuestionCatalog,
    generate: CodeGenerator,
}

impl SessionRegistry {
    pub fn new(store: StoreRef, config: SessionConfig) -> Self {
        let catalog = QuestionCatalog::new(store.clone(), config.retry.clone());
        Self {
            store,
            config,
            catalog,
            generate: Box::new(SessionCode::generate),
        }
    }

    /// Replace the random code source.
    pub fn with_code_generator(mut self, generate: impl Fn(u32) -> SessionCode + Send + Sync + 'static) -> Self {
        self.generate = Box::new(generate);
        self
    }

    /// Create a lobby for `question_set_ref` hosted by `host`.
    ///
    /// Each candidate code is claimed with a write conditioned on the code
    /// being unused, so two hosts can never end up with the same code. A
    /// collision draws a new code. Transient failures are not retried here:
    /// a lost reply could hide a session that was in fact created.
    pub async fn create_session(&self, host: &UserId, question_set_ref: &str) -> Result<SessionCode, QuizError> {
        if host != self.store.identity() {
            return Err(QuizError::Unauthorized(format!(
                "{} cannot create a session hosted by {host}",
                self.store.identity()
            )));
        }
        let set = self.catalog.read(question_set_ref).await?;

        for attempt in 1..=self.config.max_code_attempts {
            let code = (self.generate)(self.config.code_digits);
            let paths = SessionPaths::new(&code);
            let value = new_session_value(host, question_set_ref, &set.title, now_millis());
            let batch = WriteBatch::new()
                .require_absent(paths.root())
                .set(paths.root(), value);

            match self.store.apply(batch).await {
                Ok(_) => {
                    log::info!("Session {code} created by {host} for question set {question_set_ref}");
                    return Ok(code);
                }
                Err(StoreError::ConditionFailed { .. }) => {
                    log::debug!("Session code {code} already in use (attempt {attempt})");
                }
                Err(e) => return Err(e.into()),
            }
        }

        log::error!(
            "No free session code after {} attempts",
            self.config.max_code_attempts
        );
        Err(QuizError::CodeSpaceExhausted {
            attempts: self.config.max_code_attempts,
        })
    }

    /// Current state of a session.
    pub async fn lookup(&self, code: &SessionCode) -> Result<SessionSnapshot, QuizError> {
        read_session(&self.store, &self.config, code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Question, QuestionSet};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn publish(store: &MemoryStore, owner: &str) -> String {
        let catalog = QuestionCatalog::new(store.handle(owner), SessionConfig::for_testing().retry);
        catalog
            .publish(&QuestionSet::new(
                "Quiz",
                vec![Question::new("1+1?", ["1", "2"], 1)],
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = MemoryStore::new();
        let set_ref = publish(&store, "alice").await;
        let registry = SessionRegistry::new(store.handle("alice"), SessionConfig::for_testing());

        let code = registry.create_session(&UserId::new("alice"), &set_ref).await.unwrap();
        assert_eq!(code.as_str().len(), 6);

        let session = registry.lookup(&code).await.unwrap();
        assert_eq!(session.host_id, UserId::new("alice"));
        assert_eq!(session.question_set_ref, set_ref);
        assert_eq!(session.title, "Quiz");
        assert!(!session.started);
        assert!(!session.finished);
        assert!(session.roster.is_empty());
        assert!(session.current_question_index.is_none());
    }

    #[tokio::test]
    async fn test_collision_draws_new_code() {
        let store = MemoryStore::new();
        let set_ref = publish(&store, "alice").await;
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let codes = ["111111", "111111", "222222"];
        let registry = SessionRegistry::new(store.handle("alice"), SessionConfig::for_testing())
            .with_code_generator(move |_| {
                let i = counter.fetch_add(1, Ordering::SeqCst);
                SessionCode::parse(codes[i.min(codes.len() - 1)]).unwrap()
            });

        let alice = UserId::new("alice");
        let first = registry.create_session(&alice, &set_ref).await.unwrap();
        let second = registry.create_session(&alice, &set_ref).await.unwrap();
        assert_eq!(first.as_str(), "111111");
        assert_eq!(second.as_str(), "222222");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_code_space_exhausted() {
        let store = MemoryStore::new();
        let set_ref = publish(&store, "alice").await;
        let registry = SessionRegistry::new(store.handle("alice"), SessionConfig::for_testing())
            .with_code_generator(|_| SessionCode::parse("333333").unwrap());
        let alice = UserId::new("alice");
        registry.create_session(&alice, &set_ref).await.unwrap();

        let err = registry.create_session(&alice, &set_ref).await.unwrap_err();
        assert_eq!(err, QuizError::CodeSpaceExhausted { attempts: 8 });
    }

    #[tokio::test]
    async fn test_missing_question_set() {
        let store = MemoryStore::new();
        let registry = SessionRegistry::new(store.handle("alice"), SessionConfig::for_testing());
        let err = registry
            .create_session(&UserId::new("alice"), "missing")
            .await
            .unwrap_err();
        assert_eq!(err, QuizError::QuestionSetNotFound("missing".into()));
    }

    #[tokio::test]
    async fn test_cannot_host_for_someone_else() {
        let store = MemoryStore::new();
        let set_ref = publish(&store, "alice").await;
        let registry = SessionRegistry::new(store.handle("mallory"), SessionConfig::for_testing());
        let err = registry
            .create_session(&UserId::new("alice"), &set_ref)
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_unavailable_store_is_not_retried() {
        let store = MemoryStore::new();
        let set_ref = publish(&store, "alice").await;
        let registry = SessionRegistry::new(store.handle("alice"), SessionConfig::for_testing());
        store.fail_next_writes(1);
        let err = registry
            .create_session(&UserId::new("alice"), &set_ref)
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_lookup_unknown_code() {
        let store = MemoryStore::new();
        let registry = SessionRegistry::new(store.handle("alice"), SessionConfig::for_testing());
        let code = SessionCode::parse("999999").unwrap();
        assert_eq!(registry.lookup(&code).await.unwrap_err(), QuizError::NotFound(code));
    }
}
