use std::fs;

use kmeval_records::{
    classify_file, load_json_file, load_jsonl_file, load_path, FileShape, Grade, LoadError,
    SchemaError, StateId,
};
use tempfile::TempDir;

const SUBJECT_TASK: &str = r#"{"subject_id":"User1","condition":"baseline","task_id":"Task2","task_start_time":"2024-03-05 09:30:00","task_total_time":240,"km_pull_total_time":0,"km_push_total_time":12.5,"task_grade":"B","corpus_knowledge_nugget_count":0,"expert_captured_knowledge_nugget_count":3,"nugget_content":["a","b"],"task_timeout":true,"optional_content":{"notes":"done"}}"#;

const EVENTS: &str = r#"{"subject_id":7,"condition":"prototype","task_id":1,"utc_timestamp":"2024-01-01T10:00:00+00:00","state_id":"task_initialized"}
{"subject_id":7,"condition":"prototype","task_id":1,"utc_timestamp":"2024-01-01T10:00:05Z","state_id":"km_push_activity","optional_content":"wrote a note"}

{"subject_id":7,"condition":"prototype","task_id":1,"utc_timestamp":"2024-01-01T10:00:35Z","state_id":"task_conclusion"}
"#;

// ============================================================
// Classification
// ============================================================

#[test]
fn test_classify_subject_task() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("st.jsonl");
    fs::write(&path, SUBJECT_TASK).unwrap();

    assert_eq!(classify_file(&path).unwrap(), FileShape::SubjectTask);
}

#[test]
fn test_classify_state_transitions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    fs::write(&path, EVENTS).unwrap();

    assert_eq!(classify_file(&path).unwrap(), FileShape::StateTransition);
}

#[test]
fn test_unrecognized_format_reports_both_attempts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mystery.jsonl");
    fs::write(&path, r#"{"subject_id":"U1","condition":"prototype"}"#).unwrap();

    let err = classify_file(&path).unwrap_err();
    match &err {
        LoadError::UnrecognizedFileFormat {
            subject_task,
            state_transition,
            ..
        } => {
            assert!(matches!(
                subject_task,
                SchemaError::MissingField { field: "task_id", line: 1, .. }
            ));
            assert!(matches!(
                state_transition,
                SchemaError::MissingField { field: "task_id", line: 1, .. }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("Tried Subject-Task format"));
}

#[test]
fn test_empty_file_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.jsonl");
    fs::write(&path, "\n\n").unwrap();

    assert!(matches!(classify_file(&path).unwrap_err(), LoadError::Parse { .. }));
}

// ============================================================
// Loading
// ============================================================

#[test]
fn test_load_subject_task_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("st.jsonl");
    fs::write(&path, SUBJECT_TASK).unwrap();

    let loaded = load_jsonl_file(&path).unwrap();
    assert_eq!(loaded.shape, FileShape::SubjectTask);

    let record = loaded.records.values().next().unwrap();
    assert_eq!(record.task_total_time, 240.0);
    assert_eq!(record.km_push_total_time, 12.5);
    assert_eq!(record.task_start_time.to_rfc3339(), "2024-03-05T09:30:00+00:00");
    assert!(!record.carries_transitions());

    let assessment = record.assessment.as_ref().unwrap();
    assert_eq!(assessment.task_grade, Grade::Text("B".to_string()));
    assert!(assessment.task_timeout);
    assert_eq!(assessment.nugget_content.len(), 2);
}

#[test]
fn test_load_transitions_skips_blank_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    fs::write(&path, EVENTS).unwrap();

    let loaded = load_jsonl_file(&path).unwrap();
    let record = loaded.records.values().next().unwrap();

    assert_eq!(record.key().to_string(), "7_prototype_1");
    assert_eq!(record.task_total_time, 35.0);
    assert_eq!(record.km_push_total_time, 30.0);

    let events = record.state_transitions.as_ref().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[1].state_id, StateId::KmPushActivity);
    assert!(events[1].optional_content.is_some());
}

#[test]
fn test_later_subject_task_line_wins() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("st.jsonl");
    let replaced = SUBJECT_TASK.replace(r#""task_total_time":240"#, r#""task_total_time":250"#);
    fs::write(&path, format!("{SUBJECT_TASK}\n{replaced}\n")).unwrap();

    let loaded = load_jsonl_file(&path).unwrap();
    assert_eq!(loaded.records.len(), 1);
    assert_eq!(loaded.records.values().next().unwrap().task_total_time, 250.0);
}

#[test]
fn test_schema_error_reports_physical_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("st.jsonl");
    let broken = SUBJECT_TASK.replace(r#""task_timeout":true,"#, "");
    fs::write(&path, format!("{SUBJECT_TASK}\n\n{broken}\n")).unwrap();

    let err = load_jsonl_file(&path).unwrap_err();
    match err {
        LoadError::Schema(SchemaError::MissingField { field, line, file }) => {
            assert_eq!(field, "task_timeout");
            assert_eq!(line, 3);
            assert!(file.ends_with("st.jsonl"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_bad_timestamp_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("st.jsonl");
    fs::write(
        &path,
        SUBJECT_TASK.replace("2024-03-05 09:30:00", "yesterday afternoon"),
    )
    .unwrap();

    match load_jsonl_file(&path).unwrap_err() {
        LoadError::Parse { line, detail, .. } => {
            assert_eq!(line, 1);
            assert!(detail.contains("yesterday afternoon"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_embedded_state_transitions_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("st.jsonl");
    fs::write(
        &path,
        SUBJECT_TASK.replace(r#""task_timeout":true"#, r#""task_timeout":true,"state_transitions":[]"#),
    )
    .unwrap();

    assert!(matches!(
        load_jsonl_file(&path).unwrap_err(),
        LoadError::Schema(SchemaError::ReservedField { field: "state_transitions", .. })
    ));
}

#[test]
fn test_out_of_order_events() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    let events = r#"{"subject_id":"U1","condition":"baseline","task_id":"T","utc_timestamp":"2024-01-01T10:00:10Z","state_id":"task_initialized"}
{"subject_id":"U1","condition":"baseline","task_id":"T","utc_timestamp":"2024-01-01T10:00:05Z","state_id":"task_execution"}
"#;
    fs::write(&path, events).unwrap();

    assert!(matches!(
        load_jsonl_file(&path).unwrap_err(),
        LoadError::OutOfOrder { previous_line: 1, line: 2, .. }
    ));
}

#[test]
fn test_numeric_and_text_ids_continue_one_session() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    let events = r#"{"subject_id":7,"condition":"prototype","task_id":1,"utc_timestamp":"2024-01-01T10:00:00Z","state_id":"task_initialized"}
{"subject_id":"7","condition":"prototype","task_id":"1","utc_timestamp":"2024-01-01T10:00:40Z","state_id":"task_conclusion"}
"#;
    fs::write(&path, events).unwrap();

    let loaded = load_jsonl_file(&path).unwrap();
    assert_eq!(loaded.records.len(), 1);

    let record = loaded.records.values().next().unwrap();
    assert_eq!(record.key().to_string(), "7_prototype_1");
    assert_eq!(record.task_total_time, 40.0);
    assert_eq!(record.state_transitions.as_ref().unwrap().len(), 2);
}

#[test]
fn test_load_json_object() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("User1_Task2.json");
    fs::write(&path, format!("  {SUBJECT_TASK}\n")).unwrap();

    let loaded = load_json_file(&path).unwrap();
    assert_eq!(loaded.shape, FileShape::SubjectTask);
    assert_eq!(loaded.records.len(), 1);
}

#[test]
fn test_load_path_dispatches_by_extension() {
    let dir = TempDir::new().unwrap();
    let jsonl = dir.path().join("events.jsonl");
    let json = dir.path().join("one.json");
    let text = dir.path().join("readme.txt");
    fs::write(&jsonl, EVENTS).unwrap();
    fs::write(&json, SUBJECT_TASK).unwrap();
    fs::write(&text, "hello").unwrap();

    assert_eq!(load_path(&jsonl).unwrap().unwrap().shape, FileShape::StateTransition);
    assert_eq!(load_path(&json).unwrap().unwrap().shape, FileShape::SubjectTask);
    assert!(load_path(&text).unwrap().is_none());
}
