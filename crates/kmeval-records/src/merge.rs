//! Cross-file merge policy for records that share a session key.
//!
//! A session can be described by two complementary views: the
//! pre-aggregated Subject-Task record and the record derived from its
//! State-Transition events. Records of the same view must agree exactly;
//! records of different views are combined, the pre-aggregated fields
//! winning and the derived event sequence attached. Times that disagree
//! by more than the tolerance are reported but never fatal.
//!
//! Keeping the views apart makes the outcome independent of the order in
//! which files are merged, however many sources describe a session. Times
//! are compared once per session, when the second view first arrives, so
//! the warnings are order-independent too.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ConflictKind, LoadError};
use crate::types::{SessionKey, SubjectTaskRecord};

/// A record plus the name of the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedRecord {
    pub record: SubjectTaskRecord,
    pub source: String,
}

impl SourcedRecord {
    pub fn new(record: SubjectTaskRecord, source: impl Into<String>) -> Self {
        Self {
            record,
            source: source.into(),
        }
    }

    fn kind(&self) -> ConflictKind {
        if self.record.carries_transitions() {
            ConflictKind::StateTransitions
        } else {
            ConflictKind::SubjectTask
        }
    }
}

/// The timing aggregates compared across sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeField {
    TaskTotalTime,
    KmPullTotalTime,
}

impl TimeField {
    pub const COMPARED: [TimeField; 2] = [TimeField::TaskTotalTime, TimeField::KmPullTotalTime];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeField::TaskTotalTime => "task_total_time",
            TimeField::KmPullTotalTime => "km_pull_total_time",
        }
    }

    fn read(self, record: &SubjectTaskRecord) -> f64 {
        match self {
            TimeField::TaskTotalTime => record.task_total_time,
            TimeField::KmPullTotalTime => record.km_pull_total_time,
        }
    }
}

/// Non-fatal disagreement between a session's pre-aggregated and
/// transition-derived timing aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyWarning {
    pub key: String,
    pub field: TimeField,
    pub aggregate_value: f64,
    pub aggregate_source: String,
    pub derived_value: f64,
    pub derived_source: String,
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = self.field.as_str();
        write!(
            f,
            "Detected conflicting {field} for {}. Found {field} of {} in {} and {} in {}.",
            self.key,
            self.aggregate_value,
            self.aggregate_source,
            self.derived_value,
            self.derived_source
        )
    }
}

/// Everything known about one session so far.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciledEntry {
    /// Only pre-aggregated records seen.
    Aggregate(SourcedRecord),
    /// Only transition-derived records seen.
    Derived(SourcedRecord),
    /// Both views seen.
    Complete {
        aggregate: SourcedRecord,
        derived: SourcedRecord,
    },
}

impl ReconciledEntry {
    pub fn new(first: SourcedRecord) -> Self {
        match first.kind() {
            ConflictKind::SubjectTask => ReconciledEntry::Aggregate(first),
            ConflictKind::StateTransitions => ReconciledEntry::Derived(first),
        }
    }

    /// Merge another source's record for the same session.
    ///
    /// Returns the updated entry and any tolerance warnings raised, or a
    /// `ConflictingRecord` error when two records of the same view differ.
    /// Warnings are only raised when the entry becomes complete; a
    /// same-view record is either identical or fatal.
    pub fn merge(
        self,
        incoming: SourcedRecord,
        tolerance_secs: f64,
    ) -> Result<(Self, Vec<ConsistencyWarning>), LoadError> {
        let mut warnings = Vec::new();

        let merged = match (self, incoming.kind()) {
            (ReconciledEntry::Aggregate(aggregate), ConflictKind::StateTransitions) => {
                warnings = compare_times(&aggregate, &incoming, tolerance_secs);
                ReconciledEntry::Complete {
                    aggregate,
                    derived: incoming,
                }
            }
            (ReconciledEntry::Derived(derived), ConflictKind::SubjectTask) => {
                warnings = compare_times(&incoming, &derived, tolerance_secs);
                ReconciledEntry::Complete {
                    aggregate: incoming,
                    derived,
                }
            }
            (ReconciledEntry::Aggregate(existing), ConflictKind::SubjectTask) => {
                ReconciledEntry::Aggregate(confirm_identical(existing, incoming)?)
            }
            (ReconciledEntry::Derived(existing), ConflictKind::StateTransitions) => {
                ReconciledEntry::Derived(confirm_identical(existing, incoming)?)
            }
            (ReconciledEntry::Complete { aggregate, derived }, ConflictKind::SubjectTask) => {
                ReconciledEntry::Complete {
                    aggregate: confirm_identical(aggregate, incoming)?,
                    derived,
                }
            }
            (ReconciledEntry::Complete { aggregate, derived }, ConflictKind::StateTransitions) => {
                ReconciledEntry::Complete {
                    aggregate,
                    derived: confirm_identical(derived, incoming)?,
                }
            }
        };

        Ok((merged, warnings))
    }

    /// The canonical record: pre-aggregated fields when available, with
    /// the derived event sequence attached.
    pub fn canonical(&self) -> SubjectTaskRecord {
        match self {
            ReconciledEntry::Aggregate(r) | ReconciledEntry::Derived(r) => r.record.clone(),
            ReconciledEntry::Complete { aggregate, derived } => aggregate
                .record
                .clone()
                .with_state_transitions(derived.record.state_transitions.clone()),
        }
    }

    /// File the canonical record's base fields came from.
    pub fn provenance(&self) -> &str {
        match self {
            ReconciledEntry::Aggregate(r) | ReconciledEntry::Derived(r) => &r.source,
            ReconciledEntry::Complete { aggregate, .. } => &aggregate.source,
        }
    }
}

/// Same-view records must be identical; the incoming file becomes the
/// recorded source.
fn confirm_identical(
    existing: SourcedRecord,
    incoming: SourcedRecord,
) -> Result<SourcedRecord, LoadError> {
    if existing.record != incoming.record {
        return Err(LoadError::ConflictingRecord {
            key: existing.record.key().to_string(),
            kind: existing.kind(),
            fields: existing.record.differing_fields(&incoming.record),
            first_file: existing.source,
            second_file: incoming.source,
        });
    }
    Ok(SourcedRecord {
        record: existing.record,
        source: incoming.source,
    })
}

fn compare_times(
    aggregate: &SourcedRecord,
    derived: &SourcedRecord,
    tolerance_secs: f64,
) -> Vec<ConsistencyWarning> {
    let key = aggregate.record.key().to_string();
    let mut warnings = Vec::new();

    for field in TimeField::COMPARED {
        let aggregate_value = field.read(&aggregate.record);
        let derived_value = field.read(&derived.record);
        let difference = (aggregate_value - derived_value).abs();

        if difference > tolerance_secs {
            let warning = ConsistencyWarning {
                key: key.clone(),
                field,
                aggregate_value,
                aggregate_source: aggregate.source.clone(),
                derived_value,
                derived_source: derived.source.clone(),
            };
            warn!("{}", warning);
            warnings.push(warning);
        } else if difference > 0.0 {
            debug!(
                key = %key,
                field = field.as_str(),
                difference,
                "Times differ within tolerance"
            );
        }
    }

    warnings
}

/// The growing session mapping for one run.
#[derive(Debug)]
pub struct Reconciler {
    tolerance_secs: f64,
    entries: BTreeMap<SessionKey, ReconciledEntry>,
    warnings: Vec<ConsistencyWarning>,
}

impl Reconciler {
    pub fn new(tolerance_secs: f64) -> Self {
        Self {
            tolerance_secs,
            entries: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Merge one file's sessions into the mapping.
    pub fn absorb(
        &mut self,
        records: impl IntoIterator<Item = (SessionKey, SubjectTaskRecord)>,
        source: &str,
    ) -> Result<(), LoadError> {
        for (key, record) in records {
            let incoming = SourcedRecord::new(record, source);
            let entry = match self.entries.remove(&key) {
                None => ReconciledEntry::new(incoming),
                Some(existing) => {
                    let (merged, warnings) = existing.merge(incoming, self.tolerance_secs)?;
                    self.warnings.extend(warnings);
                    merged
                }
            };
            self.entries.insert(key, entry);
        }
        Ok(())
    }

    pub fn entries(&self) -> &BTreeMap<SessionKey, ReconciledEntry> {
        &self.entries
    }

    pub fn warnings(&self) -> &[ConsistencyWarning] {
        &self.warnings
    }

    /// Canonical records, their provenance, and the warnings raised.
    #[allow(clippy::type_complexity)]
    pub fn finish(
        self,
    ) -> (
        BTreeMap<SessionKey, SubjectTaskRecord>,
        BTreeMap<SessionKey, String>,
        Vec<ConsistencyWarning>,
    ) {
        let mut records = BTreeMap::new();
        let mut provenance = BTreeMap::new();
        for (key, entry) in self.entries {
            provenance.insert(key.clone(), entry.provenance().to_string());
            records.insert(key, entry.canonical());
        }
        (records, provenance, self.warnings)
    }
}
