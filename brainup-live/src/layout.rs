//! Store layout of a quiz session.
//!
//! ```text
//! questionSets/{setRef}             title, timePerQuestion?, createdBy, createdAt,
//!                                   questions/{i}/{text, options/{j}, correctOptionIndex,
//!                                                  timePerQuestion?}
//! sessions/{code}/hostId            identity of the creator, immutable
//!                 questionSetRef    immutable
//!                 title, createdAt  immutable
//!                 started           false ──► true
//!                 finished          false ──► true
//!                 currentQuestionIndex   absent until start, then 0,1,2,…
//!                 hostHeartbeat     epoch millis written by the host
//!                 roster/{pushKey}  participantIdentity, displayName, joinedAt
//!                 scores/{identity} integer ≥ 0
//!                 answers/{i}/{identity}  correct, option?
//! ```

use crate::model::{SessionCode, UserId};
use crate::store::StorePath;

pub const SESSIONS: &str = "sessions";
pub const QUESTION_SETS: &str = "questionSets";

pub const HOST_ID: &str = "hostId";
pub const QUESTION_SET_REF: &str = "questionSetRef";
pub const TITLE: &str = "title";
pub const CREATED_AT: &str = "createdAt";
pub const CREATED_BY: &str = "createdBy";
pub const STARTED: &str = "started";
pub const FINISHED: &str = "finished";
pub const CURRENT_QUESTION_INDEX: &str = "currentQuestionIndex";
pub const HOST_HEARTBEAT: &str = "hostHeartbeat";
pub const ROSTER: &str = "roster";
pub const SCORES: &str = "scores";
pub const ANSWERS: &str = "answers";

pub const PARTICIPANT_IDENTITY: &str = "participantIdentity";
pub const DISPLAY_NAME: &str = "displayName";
pub const JOINED_AT: &str = "joinedAt";

pub const QUESTIONS: &str = "questions";
pub const TEXT: &str = "text";
pub const OPTIONS: &str = "options";
pub const CORRECT_OPTION_INDEX: &str = "correctOptionIndex";
pub const TIME_PER_QUESTION: &str = "timePerQuestion";

pub const CORRECT: &str = "correct";
pub const OPTION: &str = "option";

pub fn sessions() -> StorePath {
    StorePath::root().child(SESSIONS)
}

pub fn question_sets() -> StorePath {
    StorePath::root().child(QUESTION_SETS)
}

pub fn question_set(set_ref: &str) -> StorePath {
    question_sets().child(set_ref)
}

/// Paths of one session's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    root: StorePath,
}

impl SessionPaths {
    pub fn new(code: &SessionCode) -> Self {
        Self {
            root: sessions().child(code),
        }
    }

    pub fn root(&self) -> StorePath {
        self.root.clone()
    }

    fn field(&self, name: &str) -> StorePath {
        self.root.child(name)
    }

    pub fn host_id(&self) -> StorePath {
        self.field(HOST_ID)
    }

    pub fn question_set_ref(&self) -> StorePath {
        self.field(QUESTION_SET_REF)
    }

    pub fn started(&self) -> StorePath {
        self.field(STARTED)
    }

    pub fn finished(&self) -> StorePath {
        self.field(FINISHED)
    }

    pub fn current_question_index(&self) -> StorePath {
        self.field(CURRENT_QUESTION_INDEX)
    }

    pub fn host_heartbeat(&self) -> StorePath {
        self.field(HOST_HEARTBEAT)
    }

    pub fn roster(&self) -> StorePath {
        self.field(ROSTER)
    }

    pub fn scores(&self) -> StorePath {
        self.field(SCORES)
    }

    pub fn score(&self, identity: &UserId) -> StorePath {
        self.scores().child(identity)
    }

    pub fn answers(&self, index: u32) -> StorePath {
        self.field(ANSWERS).child(index)
    }

    pub fn answer(&self, index: u32, identity: &UserId) -> StorePath {
        self.answers(index).child(identity)
    }
}
