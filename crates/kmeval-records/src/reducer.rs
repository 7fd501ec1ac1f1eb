//! Folds a State-Transition event stream into per-session records.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::error::LoadError;
use crate::transitions::{is_legal_edge, is_legal_ordering, StateId};
use crate::types::{SessionKey, StateTransitionEvent, SubjectTaskRecord};

/// The last event seen for a session.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    timestamp: DateTime<Utc>,
    state: StateId,
    line: usize,
}

#[derive(Debug)]
struct Accumulator {
    first: StateTransitionEvent,
    total: f64,
    km_pull: f64,
    km_push: f64,
    events: Vec<StateTransitionEvent>,
}

/// Stateful fold over one file's events.
///
/// Sessions may interleave within a file; each keeps its own cursor.
/// Elapsed time between two events is charged to the activity being
/// left, so a `km_pull_activity` event followed 30s later by anything
/// adds 30s of KM pull time.
#[derive(Debug)]
pub struct StreamReducer {
    file: String,
    cursors: HashMap<SessionKey, Cursor>,
    sessions: HashMap<SessionKey, Accumulator>,
    order: Vec<SessionKey>,
}

impl StreamReducer {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            cursors: HashMap::new(),
            sessions: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Feed the next event, found on 1-based line `line`.
    pub fn push(&mut self, event: StateTransitionEvent, line: usize) -> Result<(), LoadError> {
        let key = event.key();

        match self.cursors.get(&key).copied() {
            Some(previous) => {
                if !is_legal_ordering(previous.timestamp, event.utc_timestamp, previous.state) {
                    return Err(LoadError::OutOfOrder {
                        previous_line: previous.line,
                        line,
                        file: self.file.clone(),
                    });
                }
                if !is_legal_edge(previous.state, event.state_id) {
                    return Err(LoadError::InvalidTransition {
                        from: previous.state,
                        to: event.state_id,
                        from_line: previous.line,
                        to_line: line,
                        file: self.file.clone(),
                    });
                }

                let elapsed = seconds_between(previous.timestamp, event.utc_timestamp);
                if let Some(acc) = self.sessions.get_mut(&key) {
                    acc.total += elapsed;
                    match previous.state {
                        StateId::KmPullActivity => acc.km_pull += elapsed,
                        StateId::KmPushActivity => acc.km_push += elapsed,
                        _ => {}
                    }
                }
            }
            None => {
                if event.state_id != StateId::INITIAL {
                    return Err(LoadError::InvalidInitialState {
                        key: key.to_string(),
                        expected: StateId::INITIAL,
                        found: event.state_id,
                        line,
                        file: self.file.clone(),
                    });
                }
                self.order.push(key.clone());
                self.sessions.insert(
                    key.clone(),
                    Accumulator {
                        first: event.clone(),
                        total: 0.0,
                        km_pull: 0.0,
                        km_push: 0.0,
                        events: Vec::new(),
                    },
                );
            }
        }

        self.cursors.insert(
            key.clone(),
            Cursor {
                timestamp: event.utc_timestamp,
                state: event.state_id,
                line,
            },
        );
        if let Some(acc) = self.sessions.get_mut(&key) {
            acc.events.push(event);
        }
        Ok(())
    }

    /// Close every session, requiring each to have ended in
    /// `task_conclusion`. Sessions are checked in first-seen order.
    pub fn finish(mut self) -> Result<BTreeMap<SessionKey, SubjectTaskRecord>, LoadError> {
        let mut records = BTreeMap::new();

        for key in self.order {
            let Some(cursor) = self.cursors.get(&key) else {
                continue;
            };
            if cursor.state != StateId::TERMINAL {
                return Err(LoadError::InvalidFinalState {
                    key: key.to_string(),
                    expected: StateId::TERMINAL,
                    found: cursor.state,
                    line: cursor.line,
                    file: self.file,
                });
            }

            let Some(acc) = self.sessions.remove(&key) else {
                continue;
            };
            let record = SubjectTaskRecord {
                subject_id: acc.first.subject_id,
                condition: acc.first.condition,
                task_id: acc.first.task_id,
                task_start_time: acc.first.utc_timestamp,
                task_total_time: acc.total,
                km_pull_total_time: acc.km_pull,
                km_push_total_time: acc.km_push,
                assessment: None,
                optional_content: None,
                extra: Default::default(),
                state_transitions: Some(acc.events),
            };
            records.insert(key, record);
        }

        Ok(records)
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, Label};
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn event(subject: &str, secs: i64, state: StateId) -> StateTransitionEvent {
        StateTransitionEvent {
            subject_id: Label::from(subject),
            condition: Condition::Prototype,
            task_id: Label::from("Task1"),
            utc_timestamp: at(secs),
            state_id: state,
            optional_content: None,
            extra: Default::default(),
        }
    }

    fn reduce(events: Vec<StateTransitionEvent>) -> Result<BTreeMap<SessionKey, SubjectTaskRecord>, LoadError> {
        let mut reducer = StreamReducer::new("events.jsonl");
        for (i, e) in events.into_iter().enumerate() {
            reducer.push(e, i + 1)?;
        }
        reducer.finish()
    }

    #[test]
    fn test_time_is_charged_to_the_exited_activity() {
        use StateId::*;
        let records = reduce(vec![
            event("U1", 0, TaskInitialized),
            event("U1", 0, KmPullActivity),
            event("U1", 30, TaskExecution),
            event("U1", 90, TaskConclusion),
        ])
        .unwrap();

        let record = records.values().next().unwrap();
        assert_eq!(record.task_total_time, 90.0);
        assert_eq!(record.km_pull_total_time, 30.0);
        assert_eq!(record.km_push_total_time, 0.0);
        assert_eq!(record.task_start_time, at(0));
        assert_eq!(record.state_transitions.as_ref().unwrap().len(), 4);
        assert!(record.assessment.is_none());
    }

    #[test]
    fn test_push_time_accumulates_across_visits() {
        use StateId::*;
        let records = reduce(vec![
            event("U1", 0, TaskInitialized),
            event("U1", 5, KmPushActivity),
            event("U1", 15, TaskExecution),
            event("U1", 20, KmPushActivity),
            event("U1", 27, KmPullActivity),
            event("U1", 30, TaskConclusion),
        ])
        .unwrap();

        let record = records.values().next().unwrap();
        assert_eq!(record.task_total_time, 30.0);
        assert_eq!(record.km_push_total_time, 17.0);
        assert_eq!(record.km_pull_total_time, 3.0);
    }

    #[test]
    fn test_interleaved_sessions_keep_separate_cursors() {
        use StateId::*;
        let records = reduce(vec![
            event("U1", 0, TaskInitialized),
            event("U2", 1, TaskInitialized),
            event("U1", 10, TaskExecution),
            event("U2", 4, KmPullActivity),
            event("U2", 9, TaskConclusion),
            event("U1", 12, TaskConclusion),
        ])
        .unwrap();

        assert_eq!(records.len(), 2);
        let u1 = &records[&SessionKey::new("U1", Condition::Prototype, "Task1")];
        let u2 = &records[&SessionKey::new("U2", Condition::Prototype, "Task1")];
        assert_eq!(u1.task_total_time, 12.0);
        assert_eq!(u2.task_total_time, 8.0);
        assert_eq!(u2.km_pull_total_time, 5.0);
    }

    #[test]
    fn test_single_initial_event_fails_final_state() {
        let err = reduce(vec![event("U1", 0, StateId::TaskInitialized)]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::InvalidFinalState { found: StateId::TaskInitialized, line: 1, .. }
        ));
    }

    #[test]
    fn test_first_event_must_be_initialized() {
        let err = reduce(vec![event("U1", 0, StateId::TaskExecution)]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::InvalidInitialState { found: StateId::TaskExecution, line: 1, .. }
        ));
    }

    #[test]
    fn test_pull_self_loop_is_illegal() {
        use StateId::*;
        let err = reduce(vec![
            event("U1", 0, TaskInitialized),
            event("U1", 5, KmPullActivity),
            event("U1", 9, KmPullActivity),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            LoadError::InvalidTransition { from: KmPullActivity, to: KmPullActivity, from_line: 2, to_line: 3, .. }
        ));
    }

    #[test]
    fn test_execution_self_loop_is_legal() {
        use StateId::*;
        let records = reduce(vec![
            event("U1", 0, TaskInitialized),
            event("U1", 5, TaskExecution),
            event("U1", 9, TaskExecution),
            event("U1", 11, TaskConclusion),
        ])
        .unwrap();
        assert_eq!(records.values().next().unwrap().task_total_time, 11.0);
    }

    #[test]
    fn test_equal_timestamps_only_after_initialized() {
        use StateId::*;
        let err = reduce(vec![
            event("U1", 0, TaskInitialized),
            event("U1", 5, TaskExecution),
            event("U1", 5, TaskConclusion),
        ])
        .unwrap_err();
        assert!(matches!(err, LoadError::OutOfOrder { previous_line: 2, line: 3, .. }));
    }

    #[test]
    fn test_event_after_conclusion_is_illegal() {
        use StateId::*;
        let err = reduce(vec![
            event("U1", 0, TaskInitialized),
            event("U1", 5, TaskConclusion),
            event("U1", 9, TaskExecution),
        ])
        .unwrap_err();
        assert!(matches!(err, LoadError::InvalidTransition { from: TaskConclusion, .. }));
    }

    #[test]
    fn test_fractional_seconds() {
        use StateId::*;
        let mut events = vec![
            event("U1", 0, TaskInitialized),
            event("U1", 1, TaskConclusion),
        ];
        events[1].utc_timestamp = at(1) + Duration::milliseconds(250);
        let records = reduce(events).unwrap();
        assert_eq!(records.values().next().unwrap().task_total_time, 1.25);
    }
}
