use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{LoadError, SchemaError};
use crate::reducer::StreamReducer;
use crate::schema::{STATE_TRANSITION, SUBJECT_TASK};
use crate::timestamp::parse_timestamp;
use crate::transitions::StateId;
use crate::types::{
    Condition, Grade, Label, SessionKey, StateTransitionEvent, SubjectTaskRecord, TaskAssessment,
};

/// The two JSONL line shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileShape {
    SubjectTask,
    StateTransition,
}

impl FileShape {
    pub fn describe(self) -> &'static str {
        match self {
            FileShape::SubjectTask => "Subject-Task",
            FileShape::StateTransition => "State Transitions",
        }
    }
}

/// All sessions found in one file.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub shape: FileShape,
    pub records: BTreeMap<SessionKey, SubjectTaskRecord>,
}

#[derive(Deserialize)]
struct SubjectTaskLine {
    subject_id: Label,
    condition: Condition,
    task_id: Label,
    task_start_time: String,
    task_total_time: f64,
    km_pull_total_time: f64,
    km_push_total_time: f64,
    task_grade: Grade,
    corpus_knowledge_nugget_count: i64,
    expert_captured_knowledge_nugget_count: i64,
    nugget_content: Vec<Value>,
    task_timeout: bool,
    #[serde(default)]
    optional_content: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct StateTransitionLine {
    subject_id: Label,
    condition: Condition,
    task_id: Label,
    utc_timestamp: String,
    state_id: StateId,
    #[serde(default)]
    optional_content: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Decide which shape a first line has by trying Subject-Task, then
/// State-Transition. Only field presence is checked here.
pub fn classify_line(
    line: &Map<String, Value>,
    line_no: usize,
    file: &str,
) -> Result<FileShape, LoadError> {
    let subject_task = match SUBJECT_TASK.verify_present(line, line_no, file) {
        Ok(()) => return Ok(FileShape::SubjectTask),
        Err(e) => e,
    };
    let state_transition = match STATE_TRANSITION.verify_present(line, line_no, file) {
        Ok(()) => return Ok(FileShape::StateTransition),
        Err(e) => e,
    };
    Err(LoadError::UnrecognizedFileFormat {
        file: file.to_string(),
        subject_task,
        state_transition,
    })
}

/// Read just the first non-blank line of a JSONL file and classify it.
pub fn classify_file(path: &Path) -> Result<FileShape, LoadError> {
    let file_name = path.display().to_string();
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let reader = BufReader::new(file);

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| LoadError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let object = parse_object(&line, index + 1, &file_name)?;
        return classify_line(&object, index + 1, &file_name);
    }

    Err(LoadError::parse(&file_name, 1, "file is empty"))
}

/// Classify a JSONL file, then load every line with the matching loader.
pub fn load_jsonl_file(path: &Path) -> Result<LoadedFile, LoadError> {
    let shape = classify_file(path)?;
    debug!(file = %path.display(), shape = shape.describe(), "Classified JSONL file");

    let records = match shape {
        FileShape::SubjectTask => load_subject_task_file(path)?,
        FileShape::StateTransition => load_state_transitions_file(path)?,
    };
    Ok(LoadedFile { shape, records })
}

/// Load a `.json` file holding a single Subject-Task object.
pub fn load_json_file(path: &Path) -> Result<LoadedFile, LoadError> {
    let file_name = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
    let object = parse_object(content.trim(), 1, &file_name)?;
    let record = parse_subject_task(object, 1, &file_name)?;

    let mut records = BTreeMap::new();
    records.insert(record.key(), record);
    Ok(LoadedFile {
        shape: FileShape::SubjectTask,
        records,
    })
}

/// Load any supported record file by extension.
pub fn load_path(path: &Path) -> Result<Option<LoadedFile>, LoadError> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("jsonl") => load_jsonl_file(path).map(Some),
        Some("json") => load_json_file(path).map(Some),
        _ => Ok(None),
    }
}

/// Load a Subject-Task JSONL file. A later line for the same session
/// replaces an earlier one.
pub fn load_subject_task_file(
    path: &Path,
) -> Result<BTreeMap<SessionKey, SubjectTaskRecord>, LoadError> {
    let file_name = path.display().to_string();
    let mut records = BTreeMap::new();

    for (line_no, object) in read_objects(path)? {
        let record = parse_subject_task(object, line_no, &file_name)?;
        if let Some(previous) = records.insert(record.key(), record) {
            debug!(
                file = %file_name,
                line = line_no,
                key = %previous.key(),
                "Later Subject-Task line replaces earlier one"
            );
        }
    }

    Ok(records)
}

/// Load a State-Transition JSONL file, folding each session's events.
pub fn load_state_transitions_file(
    path: &Path,
) -> Result<BTreeMap<SessionKey, SubjectTaskRecord>, LoadError> {
    let file_name = path.display().to_string();
    let mut reducer = StreamReducer::new(file_name.clone());

    for (line_no, object) in read_objects(path)? {
        let event = parse_state_transition(object, line_no, &file_name)?;
        reducer.push(event, line_no)?;
    }

    reducer.finish()
}

/// Validate and convert one Subject-Task line.
pub fn parse_subject_task(
    object: Map<String, Value>,
    line_no: usize,
    file: &str,
) -> Result<SubjectTaskRecord, LoadError> {
    SUBJECT_TASK.validate(&object, line_no, file)?;
    if object.contains_key("state_transitions") {
        return Err(SchemaError::ReservedField {
            field: "state_transitions",
            line: line_no,
            file: file.to_string(),
        }
        .into());
    }

    let line: SubjectTaskLine = serde_json::from_value(Value::Object(object))
        .map_err(|e| LoadError::parse(file, line_no, e))?;
    let task_start_time =
        parse_timestamp(&line.task_start_time).map_err(|e| LoadError::parse(file, line_no, e))?;

    Ok(SubjectTaskRecord {
        subject_id: line.subject_id,
        condition: line.condition,
        task_id: line.task_id,
        task_start_time,
        task_total_time: line.task_total_time,
        km_pull_total_time: line.km_pull_total_time,
        km_push_total_time: line.km_push_total_time,
        assessment: Some(TaskAssessment {
            task_grade: line.task_grade,
            corpus_knowledge_nugget_count: line.corpus_knowledge_nugget_count,
            expert_captured_knowledge_nugget_count: line.expert_captured_knowledge_nugget_count,
            nugget_content: line.nugget_content,
            task_timeout: line.task_timeout,
        }),
        optional_content: line.optional_content,
        extra: line.extra,
        state_transitions: None,
    })
}

/// Validate and convert one State-Transition line.
pub fn parse_state_transition(
    object: Map<String, Value>,
    line_no: usize,
    file: &str,
) -> Result<StateTransitionEvent, LoadError> {
    STATE_TRANSITION.validate(&object, line_no, file)?;

    let line: StateTransitionLine = serde_json::from_value(Value::Object(object))
        .map_err(|e| LoadError::parse(file, line_no, e))?;
    let utc_timestamp =
        parse_timestamp(&line.utc_timestamp).map_err(|e| LoadError::parse(file, line_no, e))?;

    Ok(StateTransitionEvent {
        subject_id: line.subject_id,
        condition: line.condition,
        task_id: line.task_id,
        utc_timestamp,
        state_id: line.state_id,
        optional_content: line.optional_content,
        extra: line.extra,
    })
}

fn parse_object(text: &str, line_no: usize, file: &str) -> Result<Map<String, Value>, LoadError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SchemaError::NotAnObject {
            line: line_no,
            file: file.to_string(),
        }
        .into()),
        Err(e) => Err(LoadError::parse(file, line_no, e)),
    }
}

/// Every non-blank line of a JSONL file as a JSON object, with its
/// physical 1-based line number.
fn read_objects(path: &Path) -> Result<Vec<(usize, Map<String, Value>)>, LoadError> {
    let file_name = path.display().to_string();
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut objects = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| LoadError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        objects.push((index + 1, parse_object(&line, index + 1, &file_name)?));
    }
    Ok(objects)
}
