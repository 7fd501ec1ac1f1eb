use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::transitions::StateId;

/// A field missing from, or mistyped in, one input line.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Attribute '{field}' not found on line {line} of {file}")]
    MissingField {
        field: &'static str,
        line: usize,
        file: String,
    },

    #[error("{field} on line {line} of {file} is not type {expected} (found {found})")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        found: String,
        line: usize,
        file: String,
    },

    #[error("{field} on line {line} of {file} is not one of {allowed} (found {found})")]
    NotInVocabulary {
        field: &'static str,
        allowed: String,
        found: String,
        line: usize,
        file: String,
    },

    #[error("'{field}' on line {line} of {file} is derived from state transitions and cannot be supplied directly")]
    ReservedField {
        field: &'static str,
        line: usize,
        file: String,
    },

    #[error("Line {line} of {file} is not a JSON object")]
    NotAnObject { line: usize, file: String },
}

/// A malformed task-metadata table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    #[error("CSV metadata file {file} is empty")]
    Empty { file: String },

    #[error("Missing column(s) {columns:?} in CSV metadata file {file}. Required column names are: {required:?}. Optional column names are: {optional:?}.")]
    MissingColumns {
        columns: Vec<String>,
        required: Vec<&'static str>,
        optional: Vec<&'static str>,
        file: String,
    },

    #[error("Extra column(s) {columns:?} in CSV metadata file {file}. Required column names are: {required:?}. Optional column names are: {optional:?}.")]
    ExtraColumns {
        columns: Vec<String>,
        required: Vec<&'static str>,
        optional: Vec<&'static str>,
        file: String,
    },

    #[error("Column '{column}' appears more than once in CSV metadata file {file}")]
    DuplicateColumn { column: String, file: String },

    #[error("CSV metadata file {file} line {row}: expected {expected} fields, found {found}")]
    FieldCount {
        row: usize,
        expected: usize,
        found: usize,
        file: String,
    },

    #[error("CSV metadata file {file} line {row}: {column} value '{value}' is not {expected}")]
    InvalidValue {
        row: usize,
        column: &'static str,
        value: String,
        expected: &'static str,
        file: String,
    },

    #[error("CSV metadata file {file} line {row}: unterminated quoted field")]
    UnterminatedQuote { row: usize, file: String },
}

/// Which view of a session two conflicting records represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    SubjectTask,
    StateTransitions,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::SubjectTask => f.write_str("Subject Task entries"),
            ConflictKind::StateTransitions => f.write_str("State Transitions sequences"),
        }
    }
}

/// Every failure that aborts loading a file or reconciling a directory.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Line {line} of {file}: {detail}")]
    Parse {
        file: String,
        line: usize,
        detail: String,
    },

    #[error("State transition between lines {from_line} and {to_line} of {file} is not valid ({from} -> {to})")]
    InvalidTransition {
        from: StateId,
        to: StateId,
        from_line: usize,
        to_line: usize,
        file: String,
    },

    #[error("Timestamp on line {line} of {file} occurs before timestamp on line {previous_line}")]
    OutOfOrder {
        previous_line: usize,
        line: usize,
        file: String,
    },

    #[error("First state_id for {key} must be '{expected}', found '{found}'. First entry occurs on line {line} of {file}")]
    InvalidInitialState {
        key: String,
        expected: StateId,
        found: StateId,
        line: usize,
        file: String,
    },

    #[error("Last state_id for {key} must be '{expected}', found '{found}'. Last entry occurs on line {line} of {file}")]
    InvalidFinalState {
        key: String,
        expected: StateId,
        found: StateId,
        line: usize,
        file: String,
    },

    #[error("Detected two conflicting {kind} for {key} in files {first_file} and {second_file} (differing: {})", .fields.join(", "))]
    ConflictingRecord {
        key: String,
        kind: ConflictKind,
        first_file: String,
        second_file: String,
        fields: Vec<&'static str>,
    },

    #[error("Could not identify JSONL file type of {file}.\nTried Subject-Task format: {subject_task}.\nTried State Transitions format: {state_transition}.")]
    UnrecognizedFileFormat {
        file: String,
        subject_task: SchemaError,
        state_transition: SchemaError,
    },

    #[error(transparent)]
    MetadataSchema(#[from] MetadataError),
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(file: &str, line: usize, detail: impl fmt::Display) -> Self {
        LoadError::Parse {
            file: file.to_string(),
            line,
            detail: detail.to_string(),
        }
    }
}
