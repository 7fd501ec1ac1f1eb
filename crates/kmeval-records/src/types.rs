use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::transitions::StateId;

/// Experimental arm a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Prototype,
    Baseline,
}

impl Condition {
    pub const ALL: [Condition; 2] = [Condition::Prototype, Condition::Baseline];

    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Prototype => "prototype",
            Condition::Baseline => "baseline",
        }
    }

    pub fn vocabulary() -> String {
        let names: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
        format!("[{}]", names.join(", "))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prototype" => Ok(Condition::Prototype),
            "baseline" => Ok(Condition::Baseline),
            _ => Err(format!("Unknown condition: {}", s)),
        }
    }
}

/// Subject and task identifiers may be written as text or as integers.
///
/// Identity follows the written form, so `7` and `"7"` name the same
/// subject, matching the `{subject}_{condition}_{task}` key string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Number(i64),
    Text(String),
}

impl Label {
    fn canonical(&self) -> Cow<'_, str> {
        match self {
            Label::Number(n) => Cow::Owned(n.to_string()),
            Label::Text(s) => Cow::Borrowed(s),
        }
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Number(n) => write!(f, "{}", n),
            Label::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label::Text(s.to_string())
    }
}

impl From<i64> for Label {
    fn from(n: i64) -> Self {
        Label::Number(n)
    }
}

/// A task score, either numeric or a free-text grade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Grade {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Grade {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Grade::Integer(n) => Some(*n as f64),
            Grade::Float(x) => Some(*x),
            Grade::Text(_) => None,
        }
    }
}

// Integer and float grades with the same value compare equal.
impl PartialEq for Grade {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Grade::Text(a), Grade::Text(b)) => a == b,
            (Grade::Text(_), _) | (_, Grade::Text(_)) => false,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Integer(n) => write!(f, "{}", n),
            Grade::Float(x) => write!(f, "{}", x),
            Grade::Text(s) => f.write_str(s),
        }
    }
}

/// Unique identity of one attempt at one task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub subject_id: Label,
    pub condition: Condition,
    pub task_id: Label,
}

impl SessionKey {
    pub fn new(subject_id: impl Into<Label>, condition: Condition, task_id: impl Into<Label>) -> Self {
        Self {
            subject_id: subject_id.into(),
            condition,
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.subject_id, self.condition, self.task_id)
    }
}

/// A single activity event from a State-Transition log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransitionEvent {
    pub subject_id: Label,
    pub condition: Condition,
    pub task_id: Label,
    pub utc_timestamp: DateTime<Utc>,
    pub state_id: StateId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional_content: Option<Value>,
    /// Fields outside the known shape, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateTransitionEvent {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            subject_id: self.subject_id.clone(),
            condition: self.condition,
            task_id: self.task_id.clone(),
        }
    }
}

/// Grading and knowledge-capture fields that only a pre-aggregated
/// Subject-Task record supplies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskAssessment {
    pub task_grade: Grade,
    pub corpus_knowledge_nugget_count: i64,
    pub expert_captured_knowledge_nugget_count: i64,
    pub nugget_content: Vec<Value>,
    pub task_timeout: bool,
}

/// The canonical per-session record.
///
/// Built either straight from a Subject-Task line or by folding a
/// session's State-Transition events. Which file a record came from is
/// tracked beside it by the reconciler, never on the record itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectTaskRecord {
    pub subject_id: Label,
    pub condition: Condition,
    pub task_id: Label,
    pub task_start_time: DateTime<Utc>,
    pub task_total_time: f64,
    pub km_pull_total_time: f64,
    pub km_push_total_time: f64,
    #[serde(flatten)]
    pub assessment: Option<TaskAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional_content: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_transitions: Option<Vec<StateTransitionEvent>>,
}

impl SubjectTaskRecord {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            subject_id: self.subject_id.clone(),
            condition: self.condition,
            task_id: self.task_id.clone(),
        }
    }

    /// Whether this record embeds the event sequence it was derived from.
    pub fn carries_transitions(&self) -> bool {
        self.state_transitions.is_some()
    }

    /// The same record with `events` attached as its embedded sequence.
    pub fn with_state_transitions(self, events: Option<Vec<StateTransitionEvent>>) -> Self {
        Self {
            state_transitions: events,
            ..self
        }
    }

    /// Names of the fields on which `self` and `other` disagree.
    pub fn differing_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.subject_id != other.subject_id {
            fields.push("subject_id");
        }
        if self.condition != other.condition {
            fields.push("condition");
        }
        if self.task_id != other.task_id {
            fields.push("task_id");
        }
        if self.task_start_time != other.task_start_time {
            fields.push("task_start_time");
        }
        if self.task_total_time != other.task_total_time {
            fields.push("task_total_time");
        }
        if self.km_pull_total_time != other.km_pull_total_time {
            fields.push("km_pull_total_time");
        }
        if self.km_push_total_time != other.km_push_total_time {
            fields.push("km_push_total_time");
        }
        match (&self.assessment, &other.assessment) {
            (Some(a), Some(b)) => {
                if a.task_grade != b.task_grade {
                    fields.push("task_grade");
                }
                if a.corpus_knowledge_nugget_count != b.corpus_knowledge_nugget_count {
                    fields.push("corpus_knowledge_nugget_count");
                }
                if a.expert_captured_knowledge_nugget_count
                    != b.expert_captured_knowledge_nugget_count
                {
                    fields.push("expert_captured_knowledge_nugget_count");
                }
                if a.nugget_content != b.nugget_content {
                    fields.push("nugget_content");
                }
                if a.task_timeout != b.task_timeout {
                    fields.push("task_timeout");
                }
            }
            (None, None) => {}
            _ => fields.push("task_grade"),
        }
        if self.optional_content != other.optional_content {
            fields.push("optional_content");
        }
        if self.extra != other.extra {
            fields.push("extra fields");
        }
        if self.state_transitions != other.state_transitions {
            fields.push("state_transitions");
        }
        fields
    }
}
