//! Question sets: authored once, read by every client when a session starts.

use crate::config::RetryPolicy;
use crate::error::QuizError;
use crate::layout;
use crate::lease::now_millis;
use crate::model::{new_entry_key, FromStoreValue, QuestionSet};
use crate::retry::with_backoff;
use crate::store::{StoreError, StoreRef, Value, WriteBatch};

pub struct QuestionCatalog {
    store: StoreRef,
    retry: RetryPolicy,
}

impl QuestionCatalog {
    pub fn new(store: StoreRef, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Store `set` under a fresh reference owned by the caller.
    pub async fn publish(&self, set: &QuestionSet) -> Result<String, QuizError> {
        set.validate()?;
        let created_at = now_millis();
        let set_ref = new_entry_key(created_at);
        let path = layout::question_set(&set_ref);
        let batch = WriteBatch::new()
            .require_absent(path.clone())
            .set(path.clone(), set.to_value(self.store.identity(), created_at));

        match with_backoff(&self.retry, "publish question set", || self.store.apply(batch.clone())).await {
            Ok(_) => {}
            Err(StoreError::ConditionFailed { .. }) => {
                let landed = self.store.get(&path).await?;
                let creator = landed
                    .as_ref()
                    .and_then(|v| v.child(layout::CREATED_BY))
                    .and_then(Value::as_str);
                if creator != Some(self.store.identity().as_str()) {
                    return Err(QuizError::Store(StoreError::ConditionFailed {
                        path: path.to_string(),
                    }));
                }
            }
            Err(e) => return Err(e.into()),
        }

        log::info!(
            "Published question set {set_ref} ({} questions) for {}",
            set.len(),
            self.store.identity()
        );
        Ok(set_ref)
    }

    /// Read a set once. Absent or empty sets are errors.
    pub async fn read(&self, set_ref: &str) -> Result<QuestionSet, QuizError> {
        let path = layout::question_set(set_ref);
        path.validate()?;
        let value = with_backoff(&self.retry, "read question set", || self.store.get(&path)).await?;
        let set = QuestionSet::from_store_value(&path, value.as_ref())?;
        if set.is_empty() {
            return Err(QuizError::InvalidQuestionSet(format!("{set_ref} has no questions")));
        }
        Ok(set)
    }
}
