//! # kmeval-records
//!
//! Loads per-subject, per-task experiment logs from a usability study and
//! reconciles them into one canonical record per session.
//!
//! Two log shapes are understood:
//!
//! - **Subject-Task** lines: a pre-aggregated record per session.
//! - **State-Transition** lines: a raw event stream that is walked through
//!   the transition state machine and folded into a Subject-Task-shaped
//!   record with derived timing aggregates.
//!
//! ## Key Types
//!
//! - [`RecordStore`] - loads and reconciles a whole input directory
//! - [`SubjectTaskRecord`] - the canonical per-session record
//! - [`StateTransitionEvent`] - one parsed activity event
//! - [`LoadError`] - every fatal validation or reconciliation failure

pub mod error;
pub mod merge;
pub mod metadata;
pub mod parser;
pub mod reducer;
pub mod schema;
pub mod store;
pub mod timestamp;
pub mod transitions;
pub mod types;

pub use error::{ConflictKind, LoadError, MetadataError, SchemaError};
pub use merge::{ConsistencyWarning, Reconciler, ReconciledEntry, SourcedRecord, TimeField};
pub use metadata::{load_task_metadata, parse_task_metadata, TaskMetadata, TaskMetadataEntry};
pub use parser::{
    classify_file, classify_line, load_json_file, load_jsonl_file, load_path, FileShape,
    LoadedFile,
};
pub use reducer::StreamReducer;
pub use store::{
    FileReport, Reconciliation, ReconcileOptions, RecordStore, DEFAULT_TIME_TOLERANCE_SECS,
    TASK_METADATA_FILE,
};
pub use timestamp::parse_timestamp;
pub use transitions::{is_legal_edge, is_legal_ordering, StateId};
pub use types::{
    Condition, Grade, Label, SessionKey, StateTransitionEvent, SubjectTaskRecord, TaskAssessment,
};
