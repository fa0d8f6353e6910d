//! Errors surfaced by the quiz components.

use std::fmt;

use crate::model::SessionCode;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum QuizError {
    /// No session exists under the code.
    NotFound(SessionCode),
    /// The session left the lobby; joining is closed.
    AlreadyStarted(SessionCode),
    /// The caller lacks the role the operation needs.
    Unauthorized(String),
    /// An answer arrived for a round that is no longer current.
    StaleSubmission { submitted: u32, current: Option<u32> },
    /// The store stayed unreachable after retries.
    StoreUnavailable(String),
    QuestionSetNotFound(String),
    InvalidQuestionSet(String),
    InvalidCode(String),
    /// Every generated code collided with an existing session.
    CodeSpaceExhausted { attempts: u32 },
    NotStarted(SessionCode),
    NotFinished(SessionCode),
    NotEnoughPlayers { required: usize, joined: usize },
    InvalidQuestionIndex(u32),
    /// Stored data does not have the expected shape.
    Malformed { path: String, reason: String },
    /// A background task panicked or was cancelled.
    TaskFailed(String),
    Store(StoreError),
}

impl fmt::Display for QuizError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuizError::NotFound(code) => write!(f, "Session not found: {code}"),
            QuizError::AlreadyStarted(code) => write!(f, "Session already started: {code}"),
            QuizError::Unauthorized(reason) => write!(f, "Unauthorized: {reason}"),
            QuizError::StaleSubmission { submitted, current } => match current {
                Some(current) => write!(f, "Stale answer for question {submitted}; current is {current}"),
                None => write!(f, "Stale answer for question {submitted}; no round is active"),
            },
            QuizError::StoreUnavailable(reason) => write!(f, "Store unavailable: {reason}"),
            QuizError::QuestionSetNotFound(set_ref) => write!(f, "Question set not found: {set_ref}"),
            QuizError::InvalidQuestionSet(reason) => write!(f, "Invalid question set: {reason}"),
            QuizError::InvalidCode(input) => write!(f, "Invalid session code: {input:?}"),
            QuizError::CodeSpaceExhausted { attempts } => {
                write!(f, "No free session code after {attempts} attempts")
            }
            QuizError::NotStarted(code) => write!(f, "Session not started: {code}"),
            QuizError::NotFinished(code) => write!(f, "Session not finished: {code}"),
            QuizError::NotEnoughPlayers { required, joined } => {
                write!(f, "Need {required} participant(s) to start, {joined} joined")
            }
            QuizError::InvalidQuestionIndex(index) => write!(f, "No question at index {index}"),
            QuizError::Malformed { path, reason } => write!(f, "Malformed data at {path}: {reason}"),
            QuizError::TaskFailed(reason) => write!(f, "Background task failed: {reason}"),
            QuizError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for QuizError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QuizError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for QuizError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(reason) => QuizError::StoreUnavailable(reason),
            StoreError::PermissionDenied { path, reason } => {
                QuizError::Unauthorized(format!("{path}: {reason}"))
            }
            other => QuizError::Store(other),
        }
    }
}
