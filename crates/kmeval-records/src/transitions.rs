//! Activity state vocabulary and the legal transitions between states.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One phase of a task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateId {
    TaskInitialized,
    TaskExecution,
    KmPushActivity,
    KmPullActivity,
    TaskConclusion,
}

impl StateId {
    pub const ALL: [StateId; 5] = [
        StateId::TaskInitialized,
        StateId::TaskExecution,
        StateId::KmPushActivity,
        StateId::KmPullActivity,
        StateId::TaskConclusion,
    ];

    /// Every session stream must open with this state.
    pub const INITIAL: StateId = StateId::TaskInitialized;

    /// Every session stream must close with this state.
    pub const TERMINAL: StateId = StateId::TaskConclusion;

    pub fn as_str(self) -> &'static str {
        match self {
            StateId::TaskInitialized => "task_initialized",
            StateId::TaskExecution => "task_execution",
            StateId::KmPushActivity => "km_push_activity",
            StateId::KmPullActivity => "km_pull_activity",
            StateId::TaskConclusion => "task_conclusion",
        }
    }

    /// States reachable in one step from `self`.
    ///
    /// `task_execution` is the only state allowed to follow itself, and
    /// nothing may follow `task_conclusion`.
    pub fn successors(self) -> &'static [StateId] {
        use StateId::*;
        match self {
            TaskInitialized => &[TaskExecution, KmPullActivity, KmPushActivity, TaskConclusion],
            TaskExecution => &[TaskExecution, KmPushActivity, KmPullActivity, TaskConclusion],
            KmPushActivity => &[TaskExecution, KmPullActivity, TaskConclusion],
            KmPullActivity => &[KmPushActivity, TaskExecution, TaskConclusion],
            TaskConclusion => &[],
        }
    }

    /// Human-readable list of the vocabulary, used in validation messages.
    pub fn vocabulary() -> String {
        let names: Vec<&str> = Self::ALL.iter().map(|s| s.as_str()).collect();
        format!("[{}]", names.join(", "))
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Unknown state_id: {}", s))
    }
}

/// Whether `to` may directly follow `from` in a session stream.
pub fn is_legal_edge(from: StateId, to: StateId) -> bool {
    from.successors().contains(&to)
}

/// Whether an event stamped `next` may follow one stamped `previous`.
///
/// Timestamps must strictly increase, except that the event right after
/// `task_initialized` may share its timestamp.
pub fn is_legal_ordering(previous: DateTime<Utc>, next: DateTime<Utc>, from: StateId) -> bool {
    next > previous || (next >= previous && from == StateId::INITIAL)
}
