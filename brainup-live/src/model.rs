//! Typed views of what the store holds for a quiz.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QuizError;
use crate::layout;
use crate::store::{StorePath, Value};

pub use crate::store::UserId;

/// Shown when a participant joins without a usable name.
pub const ANONYMOUS_NAME: &str = "Anonymous Player";

/// Decoding of a (possibly absent) store value into a typed view.
pub trait FromStoreValue: Sized {
    fn from_store_value(path: &StorePath, value: Option<&Value>) -> Result<Self, QuizError>;
}

fn malformed(path: &StorePath, reason: impl Into<String>) -> QuizError {
    QuizError::Malformed {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn to_u32(path: &StorePath, value: &Value, what: &str) -> Result<u32, QuizError> {
    value
        .as_int()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| malformed(path, format!("{what} must be a non-negative integer")))
}

fn to_u64(value: Option<&Value>) -> u64 {
    value
        .and_then(Value::as_int)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}

fn text_field(path: &StorePath, map: &Value, key: &str) -> Result<String, QuizError> {
    map.child(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(path, format!("missing text field {key}")))
}

/// Children of a map keyed `0, 1, 2, …`, in numeric order.
fn indexed_children<'v>(path: &StorePath, value: &'v Value) -> Result<Vec<&'v Value>, QuizError> {
    let map = value
        .as_map()
        .ok_or_else(|| malformed(path, "expected an indexed map"))?;
    let mut entries: Vec<(u32, &Value)> = map
        .iter()
        .map(|(k, v)| {
            k.parse::<u32>()
                .map(|i| (i, v))
                .map_err(|_| malformed(path, format!("non-numeric index {k:?}")))
        })
        .collect::<Result<_, _>>()?;
    entries.sort_by_key(|(i, _)| *i);
    Ok(entries.into_iter().map(|(_, v)| v).collect())
}

fn indexed_map(values: impl IntoIterator<Item = Value>) -> Value {
    Value::map(values.into_iter().enumerate().map(|(i, v)| (i.to_string(), v)))
}

// ─── Session Code ─────────────────────────────────────────────────────

/// Short numeric join code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionCode(String);

impl SessionCode {
    /// Accept user input: surrounding whitespace is ignored, the rest must
    /// be 4 to 12 ASCII digits.
    pub fn parse(input: &str) -> Result<Self, QuizError> {
        let trimmed = input.trim();
        let valid = (4..=12).contains(&trimmed.len()) && trimmed.bytes().all(|b| b.is_ascii_digit());
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(QuizError::InvalidCode(input.to_string()))
        }
    }

    /// Random code of exactly `digits` digits with no leading zero.
    pub fn generate(digits: u32) -> Self {
        let digits = digits.clamp(4, 12);
        let low = 10u128.pow(digits - 1);
        let span = 9 * low;
        let n = low + Uuid::new_v4().as_u128() % span;
        Self(n.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Questions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    /// Seconds; overrides the set-level value
    pub time_per_question: Option<u32>,
}

impl Question {
    pub fn new<S: Into<String>>(
        text: impl Into<String>,
        options: impl IntoIterator<Item = S>,
        correct_option: usize,
    ) -> Self {
        Self {
            text: text.into(),
            options: options.into_iter().map(Into::into).collect(),
            correct_option,
            time_per_question: None,
        }
    }

    pub fn with_time(mut self, secs: u32) -> Self {
        self.time_per_question = Some(secs);
        self
    }

    /// A missing choice (timed out) is never correct.
    pub fn is_correct(&self, choice: Option<usize>) -> bool {
        choice == Some(self.correct_option)
    }

    fn to_value(&self) -> Value {
        let mut fields = vec![
            (layout::TEXT, Value::from(self.text.as_str())),
            (
                layout::OPTIONS,
                indexed_map(self.options.iter().map(|o| Value::from(o.as_str()))),
            ),
            (layout::CORRECT_OPTION_INDEX, Value::from(self.correct_option)),
        ];
        if let Some(secs) = self.time_per_question {
            fields.push((layout::TIME_PER_QUESTION, Value::from(secs)));
        }
        Value::map(fields)
    }

    fn from_value(path: &StorePath, value: &Value) -> Result<Self, QuizError> {
        let text = text_field(path, value, layout::TEXT)?;
        let options = match value.child(layout::OPTIONS) {
            Some(options) => indexed_children(path, options)?
                .into_iter()
                .map(|o| {
                    o.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| malformed(path, "options must be text"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let correct = value
            .child(layout::CORRECT_OPTION_INDEX)
            .ok_or_else(|| malformed(path, "missing correctOptionIndex"))?;
        let correct_option = to_u32(path, correct, layout::CORRECT_OPTION_INDEX)? as usize;
        let time_per_question = value
            .child(layout::TIME_PER_QUESTION)
            .map(|t| to_u32(path, t, layout::TIME_PER_QUESTION))
            .transpose()?;
        Ok(Self {
            text,
            options,
            correct_option,
            time_per_question,
        })
    }
}

/// An ordered list of questions authored once and read by every client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSet {
    pub title: String,
    /// Seconds per round unless a question overrides it
    pub time_per_question: Option<u32>,
    pub questions: Vec<Question>,
    pub created_by: Option<UserId>,
    pub created_at: u64,
}

impl QuestionSet {
    pub fn new(title: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            title: title.into(),
            time_per_question: None,
            questions,
            created_by: None,
            created_at: 0,
        }
    }

    pub fn with_time_per_question(mut self, secs: u32) -> Self {
        self.time_per_question = Some(secs);
        self
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&Question> {
        self.questions.get(index as usize)
    }

    /// Whole seconds for round `index`: question, then set, then `default_secs`.
    pub fn round_secs(&self, index: u32, default_secs: u32) -> u32 {
        self.get(index)
            .and_then(|q| q.time_per_question)
            .or(self.time_per_question)
            .unwrap_or(default_secs)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), QuizError> {
        if self.questions.is_empty() {
            return Err(QuizError::InvalidQuestionSet("no questions".into()));
        }
        for (i, q) in self.questions.iter().enumerate() {
            if q.options.len() < 2 {
                return Err(QuizError::InvalidQuestionSet(format!(
                    "question {i} needs at least two options"
                )));
            }
            if q.correct_option >= q.options.len() {
                return Err(QuizError::InvalidQuestionSet(format!(
                    "question {i} marks option {} correct but has {}",
                    q.correct_option,
                    q.options.len()
                )));
            }
        }
        Ok(())
    }

    pub fn to_value(&self, created_by: &UserId, created_at: u64) -> Value {
        let mut fields = vec![
            (layout::TITLE, Value::from(self.title.as_str())),
            (layout::CREATED_BY, Value::from(created_by.as_str())),
            (layout::CREATED_AT, Value::from(created_at)),
            (
                layout::QUESTIONS,
                indexed_map(self.questions.iter().map(Question::to_value)),
            ),
        ];
        if let Some(secs) = self.time_per_question {
            fields.push((layout::TIME_PER_QUESTION, Value::from(secs)));
        }
        Value::map(fields)
    }
}

impl FromStoreValue for QuestionSet {
    fn from_store_value(path: &StorePath, value: Option<&Value>) -> Result<Self, QuizError> {
        let value = value.ok_or_else(|| {
            QuizError::QuestionSetNotFound(path.last().unwrap_or_default().to_string())
        })?;
        let questions = match value.child(layout::QUESTIONS) {
            Some(qs) => indexed_children(path, qs)?
                .into_iter()
                .map(|q| Question::from_value(path, q))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let time_per_question = value
            .child(layout::TIME_PER_QUESTION)
            .map(|t| to_u32(path, t, layout::TIME_PER_QUESTION))
            .transpose()?;
        Ok(Self {
            title: value
                .child(layout::TITLE)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            time_per_question,
            questions,
            created_by: value
                .child(layout::CREATED_BY)
                .and_then(Value::as_str)
                .map(UserId::from),
            created_at: to_u64(value.child(layout::CREATED_AT)),
        })
    }
}

// ─── Roster ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Key of the roster entry, ordered by join time
    pub entry_id: String,
    pub identity: UserId,
    pub display_name: String,
    pub joined_at: u64,
}

/// Roster entries in join order. One identity may appear more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    pub entries: Vec<Participant>,
}

impl RosterSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &UserId) -> bool {
        self.entries.iter().any(|p| &p.identity == identity)
    }

    /// Distinct identities in order of first join.
    pub fn identities(&self) -> Vec<&UserId> {
        let mut seen = Vec::new();
        for p in &self.entries {
            if !seen.contains(&&p.identity) {
                seen.push(&p.identity);
            }
        }
        seen
    }

    /// Name from the identity's first entry.
    pub fn display_name_of(&self, identity: &UserId) -> Option<&str> {
        self.entries
            .iter()
            .find(|p| &p.identity == identity)
            .map(|p| p.display_name.as_str())
    }
}

impl FromStoreValue for RosterSnapshot {
    fn from_store_value(path: &StorePath, value: Option<&Value>) -> Result<Self, QuizError> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let map = value
            .as_map()
            .ok_or_else(|| malformed(path, "roster must be a map"))?;
        let entries = map
            .iter()
            .map(|(key, entry)| {
                let identity = text_field(path, entry, layout::PARTICIPANT_IDENTITY)?;
                Ok(Participant {
                    entry_id: key.clone(),
                    identity: UserId::new(identity),
                    display_name: entry
                        .child(layout::DISPLAY_NAME)
                        .and_then(Value::as_str)
                        .unwrap_or(ANONYMOUS_NAME)
                        .to_string(),
                    joined_at: to_u64(entry.child(layout::JOINED_AT)),
                })
            })
            .collect::<Result<Vec<_>, QuizError>>()?;
        Ok(Self { entries })
    }
}

// ─── Scores ───────────────────────────────────────────────────────────

/// Per-identity tallies. Absent means zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoresSnapshot {
    pub scores: BTreeMap<UserId, u32>,
}

impl ScoresSnapshot {
    pub fn score_of(&self, identity: &UserId) -> u32 {
        self.scores.get(identity).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl FromStoreValue for ScoresSnapshot {
    fn from_store_value(path: &StorePath, value: Option<&Value>) -> Result<Self, QuizError> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let map = value
            .as_map()
            .ok_or_else(|| malformed(path, "scores must be a map"))?;
        let scores = map
            .iter()
            .map(|(identity, score)| Ok((UserId::new(identity.as_str()), to_u32(path, score, "score")?)))
            .collect::<Result<BTreeMap<_, _>, QuizError>>()?;
        Ok(Self { scores })
    }
}

// ─── Answers ──────────────────────────────────────────────────────────

/// One participant's claim on a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerRecord {
    pub correct: bool,
    /// `None` when the participant let the round expire
    pub option: Option<usize>,
}

impl AnswerRecord {
    pub fn to_value(&self) -> Value {
        let mut fields = vec![(layout::CORRECT, Value::Bool(self.correct))];
        if let Some(option) = self.option {
            fields.push((layout::OPTION, Value::from(option)));
        }
        Value::map(fields)
    }

    fn from_value(path: &StorePath, value: &Value) -> Result<Self, QuizError> {
        let correct = value
            .child(layout::CORRECT)
            .and_then(Value::as_bool)
            .ok_or_else(|| malformed(path, "answer missing correct flag"))?;
        let option = value
            .child(layout::OPTION)
            .map(|o| to_u32(path, o, layout::OPTION).map(|o| o as usize))
            .transpose()?;
        Ok(Self { correct, option })
    }
}

impl FromStoreValue for Option<AnswerRecord> {
    fn from_store_value(path: &StorePath, value: Option<&Value>) -> Result<Self, QuizError> {
        value.map(|v| AnswerRecord::from_value(path, v)).transpose()
    }
}

// ─── Flags ────────────────────────────────────────────────────────────

/// Absent flags read as `false`.
impl FromStoreValue for bool {
    fn from_store_value(path: &StorePath, value: Option<&Value>) -> Result<Self, QuizError> {
        match value {
            None => Ok(false),
            Some(v) => v.as_bool().ok_or_else(|| malformed(path, "expected a boolean")),
        }
    }
}

/// Question index; absent until the session starts.
impl FromStoreValue for Option<u32> {
    fn from_store_value(path: &StorePath, value: Option<&Value>) -> Result<Self, QuizError> {
        value.map(|v| to_u32(path, v, "index")).transpose()
    }
}

// ─── Session ──────────────────────────────────────────────────────────

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Lobby,
    Question(u32),
    Finished,
}

/// Everything stored under `sessions/{code}`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub code: SessionCode,
    pub host_id: UserId,
    pub question_set_ref: String,
    pub title: String,
    pub created_at: u64,
    pub started: bool,
    pub finished: bool,
    pub current_question_index: Option<u32>,
    pub host_heartbeat: Option<u64>,
    pub roster: RosterSnapshot,
    pub scores: ScoresSnapshot,
    pub answers: BTreeMap<u32, BTreeMap<UserId, AnswerRecord>>,
}

impl SessionSnapshot {
    pub fn phase(&self) -> SessionPhase {
        if self.finished {
            SessionPhase::Finished
        } else if self.started {
            SessionPhase::Question(self.current_question_index.unwrap_or(0))
        } else {
            SessionPhase::Lobby
        }
    }

    pub fn answer(&self, index: u32, identity: &UserId) -> Option<&AnswerRecord> {
        self.answers.get(&index).and_then(|round| round.get(identity))
    }

    pub fn has_answered(&self, index: u32, identity: &UserId) -> bool {
        self.answer(index, identity).is_some()
    }

    /// Roster identities other than the host.
    pub fn players(&self) -> Vec<&UserId> {
        self.roster
            .identities()
            .into_iter()
            .filter(|id| **id != self.host_id)
            .collect()
    }

    /// True once every player has claimed round `index`. False with no players.
    pub fn all_answered(&self, index: u32) -> bool {
        let players = self.players();
        !players.is_empty() && players.iter().all(|id| self.has_answered(index, id))
    }
}

impl FromStoreValue for SessionSnapshot {
    fn from_store_value(path: &StorePath, value: Option<&Value>) -> Result<Self, QuizError> {
        let code = SessionCode::parse(path.last().unwrap_or_default())?;
        let value = value.ok_or_else(|| QuizError::NotFound(code.clone()))?;

        let host_id = UserId::new(text_field(path, value, layout::HOST_ID)?);
        let question_set_ref = text_field(path, value, layout::QUESTION_SET_REF)?;
        let child = |key: &str| value.child(key);

        let mut answers = BTreeMap::new();
        if let Some(rounds) = child(layout::ANSWERS).and_then(Value::as_map) {
            for (index, round) in rounds {
                let index: u32 = index
                    .parse()
                    .map_err(|_| malformed(path, format!("non-numeric round {index:?}")))?;
                let mut claims = BTreeMap::new();
                for (identity, record) in round.as_map().into_iter().flatten() {
                    claims.insert(UserId::new(identity.as_str()), AnswerRecord::from_value(path, record)?);
                }
                answers.insert(index, claims);
            }
        }

        Ok(Self {
            code,
            host_id,
            question_set_ref,
            title: child(layout::TITLE)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            created_at: to_u64(child(layout::CREATED_AT)),
            started: bool::from_store_value(path, child(layout::STARTED))?,
            finished: bool::from_store_value(path, child(layout::FINISHED))?,
            current_question_index: Option::<u32>::from_store_value(
                path,
                child(layout::CURRENT_QUESTION_INDEX),
            )?,
            host_heartbeat: child(layout::HOST_HEARTBEAT)
                .and_then(Value::as_int)
                .and_then(|n| u64::try_from(n).ok()),
            roster: RosterSnapshot::from_store_value(path, child(layout::ROSTER))?,
            scores: ScoresSnapshot::from_store_value(path, child(layout::SCORES))?,
            answers,
        })
    }
}

/// Initial record written when a session is created.
pub(crate) fn new_session_value(host: &UserId, set_ref: &str, title: &str, created_at: u64) -> Value {
    Value::map([
        (layout::HOST_ID, Value::from(host.as_str())),
        (layout::QUESTION_SET_REF, Value::from(set_ref)),
        (layout::TITLE, Value::from(title)),
        (layout::CREATED_AT, Value::from(created_at)),
        (layout::STARTED, Value::Bool(false)),
        (layout::FINISHED, Value::Bool(false)),
    ])
}

/// Roster entry for a join. Blank names become [`ANONYMOUS_NAME`].
/// Client-chosen key for a record that must be written exactly once:
/// creation millis for ordering, then a random suffix. A retried write
/// reuses the key, so `require_absent` makes it idempotent.
pub(crate) fn new_entry_key(now_ms: u64) -> String {
    format!("{now_ms:013x}-{}", Uuid::new_v4().simple())
}

pub(crate) fn roster_entry_value(identity: &UserId, display_name: &str, joined_at: u64) -> Value {
    let name = match display_name.trim() {
        "" => ANONYMOUS_NAME,
        name => name,
    };
    Value::map([
        (layout::PARTICIPANT_IDENTITY, Value::from(identity.as_str())),
        (layout::DISPLAY_NAME, Value::from(name)),
        (layout::JOINED_AT, Value::from(joined_at)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SessionPaths;

    fn sample_set() -> QuestionSet {
        QuestionSet::new(
            "Capitals",
            vec![
                Question::new("Capital of France?", ["Paris", "Rome", "Berlin"], 0),
                Question::new("Capital of Italy?", ["Paris", "Rome"], 1).with_time(20),
            ],
        )
        .with_time_per_question(15)
    }

    #[test]
    fn test_code_parse() {
        assert_eq!(SessionCode::parse(" 482913\n").unwrap().as_str(), "482913");
        assert!(SessionCode::parse("48a913").is_err());
        assert!(SessionCode::parse("").is_err());
        assert!(SessionCode::parse("123").is_err());
    }

    #[test]
    fn test_code_generate_range() {
        for _ in 0..500 {
            let code = SessionCode::generate(6);
            let n: u32 = code.as_str().parse().unwrap();
            assert!((100_000..=999_999).contains(&n), "{code}");
        }
    }

    #[test]
    fn test_question_set_round_trip_through_store_value() {
        let set = sample_set();
        let owner = UserId::new("alice");
        let value = set.to_value(&owner, 1234);
        let path = crate::layout::question_set("q1");
        let back = QuestionSet::from_store_value(&path, Some(&value)).unwrap();

        assert_eq!(back.title, "Capitals");
        assert_eq!(back.questions, set.questions);
        assert_eq!(back.created_by, Some(owner));
        assert_eq!(back.created_at, 1234);
    }

    #[test]
    fn test_question_order_is_numeric() {
        let questions: Vec<Question> = (0..12)
            .map(|i| Question::new(format!("Q{i}"), ["a", "b"], 0))
            .collect();
        let set = QuestionSet::new("Many", questions);
        let value = set.to_value(&UserId::new("a"), 0);
        let back = QuestionSet::from_store_value(&crate::layout::question_set("x"), Some(&value)).unwrap();
        assert_eq!(back.questions[10].text, "Q10");
        assert_eq!(back.questions[2].text, "Q2");
    }

    #[test]
    fn test_round_secs_precedence() {
        let set = sample_set();
        assert_eq!(set.round_secs(0, 10), 15);
        assert_eq!(set.round_secs(1, 10), 20);
        let plain = QuestionSet::new("Plain", vec![Question::new("Q", ["a", "b"], 0)]);
        assert_eq!(plain.round_secs(0, 10), 10);
    }

    #[test]
    fn test_validate() {
        assert!(sample_set().validate().is_ok());
        assert!(QuestionSet::new("Empty", vec![]).validate().is_err());
        let bad = QuestionSet::new("Bad", vec![Question::new("Q", ["a", "b"], 2)]);
        assert!(matches!(bad.validate(), Err(QuizError::InvalidQuestionSet(_))));
    }

    #[test]
    fn test_missing_question_set() {
        let err = QuestionSet::from_store_value(&crate::layout::question_set("gone"), None).unwrap_err();
        assert_eq!(err, QuizError::QuestionSetNotFound("gone".into()));
    }

    #[test]
    fn test_is_correct() {
        let q = Question::new("Q", ["a", "b"], 1);
        assert!(q.is_correct(Some(1)));
        assert!(!q.is_correct(Some(0)));
        assert!(!q.is_correct(None));
    }

    #[test]
    fn test_roster_anonymous_and_order() {
        let bob = UserId::new("bob");
        let carol = UserId::new("carol");
        let roster_value = Value::map([
            ("k1", roster_entry_value(&bob, "Bob", 1)),
            ("k2", roster_entry_value(&carol, "   ", 2)),
            ("k3", roster_entry_value(&bob, "Bobby", 3)),
        ]);
        let path = StorePath::parse("sessions/111111/roster").unwrap();
        let roster = RosterSnapshot::from_store_value(&path, Some(&roster_value)).unwrap();

        assert_eq!(roster.len(), 3);
        assert_eq!(roster.identities(), vec![&bob, &carol]);
        assert_eq!(roster.display_name_of(&carol), Some(ANONYMOUS_NAME));
        assert_eq!(roster.display_name_of(&bob), Some("Bob"));
    }

    #[test]
    fn test_flags_absent_default() {
        let path = StorePath::parse("sessions/111111/started").unwrap();
        assert!(!bool::from_store_value(&path, None).unwrap());
        assert!(bool::from_store_value(&path, Some(&Value::Int(1))).is_err());
        assert_eq!(Option::<u32>::from_store_value(&path, None).unwrap(), None);
    }

    #[test]
    fn test_session_snapshot() {
        let code = SessionCode::parse("111111").unwrap();
        let paths = SessionPaths::new(&code);
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        let mut tree = crate::store::Tree::new();
        tree.set(&paths.root(), Some(new_session_value(&alice, "q1", "Capitals", 5)));
        tree.set(&paths.roster().child("k1"), Some(roster_entry_value(&bob, "Bob", 6)));
        tree.set(&paths.started(), Some(Value::Bool(true)));
        tree.set(&paths.current_question_index(), Some(Value::Int(1)));
        tree.set(&paths.score(&bob), Some(Value::Int(1)));
        tree.set(
            &paths.answer(1, &bob),
            Some(AnswerRecord { correct: true, option: Some(1) }.to_value()),
        );

        let value = tree.get(&paths.root());
        let snapshot = SessionSnapshot::from_store_value(&paths.root(), value.as_ref()).unwrap();
        assert_eq!(snapshot.code, code);
        assert_eq!(snapshot.phase(), SessionPhase::Question(1));
        assert_eq!(snapshot.scores.score_of(&bob), 1);
        assert_eq!(snapshot.scores.score_of(&alice), 0);
        assert!(snapshot.has_answered(1, &bob));
        assert!(snapshot.all_answered(1));
        assert!(!snapshot.all_answered(0));
    }

    #[test]
    fn test_missing_session_is_not_found() {
        let path = StorePath::parse("sessions/222222").unwrap();
        let err = SessionSnapshot::from_store_value(&path, None).unwrap_err();
        assert!(matches!(err, QuizError::NotFound(_)));
    }
}
