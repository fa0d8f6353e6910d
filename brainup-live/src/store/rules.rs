//! Server-side access rules applied to every committed batch.
//!
//! Rules see the tree as it was before the batch and every write the batch
//! would make. Any violation rejects the whole batch.

use super::{ResolvedWrite, StoreError, Tree, UserId, Value};
use crate::layout;

pub trait WriteRules: Send + Sync {
    fn check(&self, caller: &UserId, tree: &Tree, writes: &[ResolvedWrite]) -> Result<(), StoreError>;
}

/// Accepts everything. For tooling and tests that seed arbitrary data.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenRules;

impl WriteRules for OpenRules {
    fn check(&self, _caller: &UserId, _tree: &Tree, _writes: &[ResolvedWrite]) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Quiz session rules.
///
/// - question sets are created once, attributed to the caller
/// - a session is created once with the caller as host; only the host may
///   delete it or touch its flags
/// - `started` and `finished` never revert, the question index never
///   decreases
/// - participants add their own roster entry while the session is in its
///   lobby, write only their own score and claim each answer slot once
/// - the host neither scores nor answers
#[derive(Debug, Clone, Copy, Default)]
pub struct QuizRules;

impl WriteRules for QuizRules {
    fn check(&self, caller: &UserId, tree: &Tree, writes: &[ResolvedWrite]) -> Result<(), StoreError> {
        writes
            .iter()
            .try_for_each(|write| check_write(caller, tree, write))
    }
}

fn deny(write: &ResolvedWrite, reason: &str) -> StoreError {
    StoreError::PermissionDenied {
        path: write.path.to_string(),
        reason: reason.to_string(),
    }
}

fn host_of<'t>(tree: &'t Tree, code: &str) -> Option<&'t str> {
    let path = layout::sessions().child(code).child(layout::HOST_ID);
    tree.peek(&path).and_then(Value::as_str)
}

fn require_host(caller: &UserId, tree: &Tree, code: &str, write: &ResolvedWrite) -> Result<(), StoreError> {
    match host_of(tree, code) {
        Some(host) if host == caller.as_str() => Ok(()),
        Some(_) => Err(deny(write, "only the host may change this field")),
        None => Err(deny(write, "session does not exist")),
    }
}

fn is_started(tree: &Tree, code: &str) -> bool {
    let path = layout::sessions().child(code).child(layout::STARTED);
    tree.peek(&path).and_then(Value::as_bool).unwrap_or(false)
}

fn require_session(tree: &Tree, code: &str, write: &ResolvedWrite) -> Result<(), StoreError> {
    host_of(tree, code)
        .map(|_| ())
        .ok_or_else(|| deny(write, "session does not exist"))
}

fn check_write(caller: &UserId, tree: &Tree, write: &ResolvedWrite) -> Result<(), StoreError> {
    let segments: Vec<&str> = write.path.segments().iter().map(String::as_str).collect();
    let before = tree.peek(&write.path);
    let after = write.value.as_ref();

    match segments.as_slice() {
        [layout::QUESTION_SETS, _] => {
            if before.is_some() {
                return Err(deny(write, "question sets are immutable"));
            }
            let creator = after.and_then(|v| v.child(layout::CREATED_BY)).and_then(Value::as_str);
            if creator != Some(caller.as_str()) {
                return Err(deny(write, "createdBy must be the caller"));
            }
            Ok(())
        }

        [layout::SESSIONS, code] => match (before, after) {
            (None, Some(value)) => {
                let host = value.child(layout::HOST_ID).and_then(Value::as_str);
                if host != Some(caller.as_str()) {
                    return Err(deny(write, "hostId must be the caller"));
                }
                Ok(())
            }
            (Some(_), None) => require_host(caller, tree, code, write),
            (Some(_), Some(_)) => Err(deny(write, "sessions cannot be overwritten")),
            (None, None) => Ok(()),
        },

        [layout::SESSIONS, code, layout::STARTED | layout::FINISHED] => {
            require_host(caller, tree, code, write)?;
            match (before.and_then(Value::as_bool), after.and_then(Value::as_bool)) {
                (Some(true), Some(false)) => Err(deny(write, "flag cannot be reverted")),
                (_, Some(_)) => Ok(()),
                (_, None) => Err(deny(write, "flag must be a boolean")),
            }
        }

        [layout::SESSIONS, code, layout::CURRENT_QUESTION_INDEX] => {
            require_host(caller, tree, code, write)?;
            let previous = before.and_then(Value::as_int);
            match after.and_then(Value::as_int) {
                Some(next) if next < 0 => Err(deny(write, "index must be non-negative")),
                Some(next) if previous.is_some_and(|p| next < p) => {
                    Err(deny(write, "index cannot decrease"))
                }
                Some(_) => Ok(()),
                None => Err(deny(write, "index must be an integer")),
            }
        }

        [layout::SESSIONS, code, layout::HOST_HEARTBEAT] => {
            require_host(caller, tree, code, write)?;
            match after {
                Some(Value::Int(_)) => Ok(()),
                _ => Err(deny(write, "heartbeat must be an integer")),
            }
        }

        [layout::SESSIONS, code, layout::ROSTER, _] => {
            require_session(tree, code, write)?;
            if before.is_some() || after.is_none() {
                return Err(deny(write, "roster entries are append-only"));
            }
            if is_started(tree, code) {
                return Err(deny(write, "roster is closed once the session starts"));
            }
            let identity = after
                .and_then(|v| v.child(layout::PARTICIPANT_IDENTITY))
                .and_then(Value::as_str);
            if identity != Some(caller.as_str()) {
                return Err(deny(write, "participants may only add themselves"));
            }
            Ok(())
        }

        [layout::SESSIONS, code, layout::SCORES, identity] => {
            require_session(tree, code, write)?;
            if *identity != caller.as_str() {
                return Err(deny(write, "participants may only write their own score"));
            }
            if host_of(tree, code) == Some(*identity) {
                return Err(deny(write, "the host does not score"));
            }
            match after {
                Some(Value::Int(n)) if *n >= 0 => Ok(()),
                _ => Err(deny(write, "score must be a non-negative integer")),
            }
        }

        [layout::SESSIONS, code, layout::ANSWERS, _, identity] => {
            require_session(tree, code, write)?;
            if *identity != caller.as_str() {
                return Err(deny(write, "participants may only answer for themselves"));
            }
            if host_of(tree, code) == Some(*identity) {
                return Err(deny(write, "the host does not answer"));
            }
            if before.is_some() {
                return Err(deny(write, "answers are final"));
            }
            match after {
                Some(Value::Map(_)) => Ok(()),
                _ => Err(deny(write, "answer must be a record")),
            }
        }

        _ => Err(deny(write, "path is not writable")),
    }
}
