//! Field tables for the input shapes and the presence/type checks shared
//! by all of them.
//!
//! The checks only inspect values; converting a validated line into typed
//! records is the parser's job.

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::transitions::StateId;
use crate::types::Condition;

/// The declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Text or integer identifier.
    Label,
    /// One of the experimental conditions.
    Condition,
    /// One of the activity states.
    StateId,
    /// ISO 8601 text; parsed after validation.
    Timestamp,
    /// Integer or floating point.
    Number,
    Integer,
    /// Number or text.
    Grade,
    List,
    Boolean,
    /// Anything goes; never type-checked.
    Untyped,
}

impl FieldType {
    pub fn describe(self) -> &'static str {
        match self {
            FieldType::Label => "string | integer",
            FieldType::Condition => "condition",
            FieldType::StateId => "state_id",
            FieldType::Timestamp => "ISO 8601 timestamp string",
            FieldType::Number => "float | integer",
            FieldType::Integer => "integer",
            FieldType::Grade => "string | integer | float",
            FieldType::List => "list",
            FieldType::Boolean => "boolean",
            FieldType::Untyped => "any",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::Label => value.is_string() || value.is_i64(),
            FieldType::Condition | FieldType::StateId | FieldType::Timestamp => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64(),
            FieldType::Grade => value.is_string() || value.is_number(),
            FieldType::List => value.is_array(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Untyped => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

const fn required(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: true,
    }
}

const fn optional(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: false,
    }
}

/// A named field table.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

pub const SUBJECT_TASK: Schema = Schema {
    name: "Subject-Task",
    fields: &[
        required("subject_id", FieldType::Label),
        required("condition", FieldType::Condition),
        required("task_id", FieldType::Label),
        required("task_start_time", FieldType::Timestamp),
        required("task_total_time", FieldType::Number),
        required("km_pull_total_time", FieldType::Number),
        required("km_push_total_time", FieldType::Number),
        required("task_grade", FieldType::Grade),
        required("corpus_knowledge_nugget_count", FieldType::Integer),
        required("expert_captured_knowledge_nugget_count", FieldType::Integer),
        required("nugget_content", FieldType::List),
        required("task_timeout", FieldType::Boolean),
        optional("optional_content", FieldType::Untyped),
    ],
};

pub const STATE_TRANSITION: Schema = Schema {
    name: "State Transitions",
    fields: &[
        required("subject_id", FieldType::Label),
        required("condition", FieldType::Condition),
        required("task_id", FieldType::Label),
        required("utc_timestamp", FieldType::Timestamp),
        required("state_id", FieldType::StateId),
        optional("optional_content", FieldType::Untyped),
    ],
};

/// Columns of the task-metadata table. Cells arrive as text, so the
/// declared types describe what each cell must convert to.
pub const TASK_METADATA: Schema = Schema {
    name: "Task Metadata",
    fields: &[
        required("task_id", FieldType::Untyped),
        required("task_optimal_time_in_seconds", FieldType::Number),
        required("task_maximum_score", FieldType::Integer),
        optional("task_passing_score", FieldType::Number),
    ],
};

impl Schema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_names(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect()
    }

    pub fn optional_names(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| !f.required)
            .map(|f| f.name)
            .collect()
    }

    /// First required field for which `has` returns false.
    pub fn first_missing(&self, has: impl Fn(&str) -> bool) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|f| f.required && !has(f.name))
            .map(|f| f.name)
    }

    /// Required fields for which `has` returns false, in table order.
    pub fn all_missing(&self, has: impl Fn(&str) -> bool) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.required && !has(f.name))
            .map(|f| f.name)
            .collect()
    }

    /// Confirm every required field is present on a JSON line.
    pub fn verify_present(
        &self,
        line: &Map<String, Value>,
        line_no: usize,
        file: &str,
    ) -> Result<(), SchemaError> {
        match self.first_missing(|name| line.contains_key(name)) {
            Some(field) => Err(SchemaError::MissingField {
                field,
                line: line_no,
                file: file.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Confirm each present field with a declared type holds a value of
    /// that type. Fields outside the table are skipped.
    pub fn type_check(
        &self,
        line: &Map<String, Value>,
        line_no: usize,
        file: &str,
    ) -> Result<(), SchemaError> {
        for (name, value) in line {
            let Some(spec) = self.field(name) else {
                continue;
            };

            if !spec.ty.accepts(value) {
                return Err(SchemaError::TypeMismatch {
                    field: spec.name,
                    expected: spec.ty.describe(),
                    found: describe_value(value),
                    line: line_no,
                    file: file.to_string(),
                });
            }

            let vocabulary = match spec.ty {
                FieldType::Condition => value
                    .as_str()
                    .filter(|s| s.parse::<Condition>().is_err())
                    .map(|_| Condition::vocabulary()),
                FieldType::StateId => value
                    .as_str()
                    .filter(|s| s.parse::<StateId>().is_err())
                    .map(|_| StateId::vocabulary()),
                _ => None,
            };
            if let Some(allowed) = vocabulary {
                return Err(SchemaError::NotInVocabulary {
                    field: spec.name,
                    allowed,
                    found: value.to_string(),
                    line: line_no,
                    file: file.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Presence check followed by type check.
    pub fn validate(
        &self,
        line: &Map<String, Value>,
        line_no: usize,
        file: &str,
    ) -> Result<(), SchemaError> {
        self.verify_present(line, line_no, file)?;
        self.type_check(line, line_no, file)
    }
}

fn describe_value(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.len() > 60 {
        let cut = (0..=60).rev().find(|&i| rendered.is_char_boundary(i)).unwrap_or(0);
        format!("{}...", &rendered[..cut])
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture is not an object"),
        }
    }

    fn subject_task_line() -> Map<String, Value> {
        object(json!({
            "subject_id": "User1",
            "condition": "prototype",
            "task_id": "Task1",
            "task_start_time": "2024-01-01T10:00:00Z",
            "task_total_time": 120.5,
            "km_pull_total_time": 30,
            "km_push_total_time": 0,
            "task_grade": 4,
            "corpus_knowledge_nugget_count": 2,
            "expert_captured_knowledge_nugget_count": 1,
            "nugget_content": [],
            "task_timeout": false
        }))
    }

    #[test]
    fn test_subject_task_line_is_valid() {
        assert!(SUBJECT_TASK.validate(&subject_task_line(), 1, "st.jsonl").is_ok());
    }

    #[test]
    fn test_optional_content_is_exempt_and_untyped() {
        let mut line = subject_task_line();
        assert!(!line.contains_key("optional_content"));
        assert!(SUBJECT_TASK.validate(&line, 1, "st.jsonl").is_ok());

        line.insert("optional_content".to_string(), json!("free text"));
        assert!(SUBJECT_TASK.validate(&line, 1, "st.jsonl").is_ok());
    }

    #[test]
    fn test_missing_field_names_field_line_and_file() {
        let mut line = subject_task_line();
        line.remove("task_timeout");

        let err = SUBJECT_TASK.validate(&line, 7, "st.jsonl").unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingField {
                field: "task_timeout",
                line: 7,
                file: "st.jsonl".to_string(),
            }
        );
        assert_eq!(
            err.to_string(),
            "Attribute 'task_timeout' not found on line 7 of st.jsonl"
        );
    }

    #[test]
    fn test_type_mismatch() {
        let mut line = subject_task_line();
        line.insert("corpus_knowledge_nugget_count".to_string(), json!(2.5));

        let err = SUBJECT_TASK.validate(&line, 3, "st.jsonl").unwrap_err();
        assert!(matches!(
            err,
            SchemaError::TypeMismatch { field: "corpus_knowledge_nugget_count", line: 3, .. }
        ));
    }

    #[test]
    fn test_condition_outside_vocabulary() {
        let mut line = subject_task_line();
        line.insert("condition".to_string(), json!("control"));

        let err = SUBJECT_TASK.validate(&line, 1, "st.jsonl").unwrap_err();
        match err {
            SchemaError::NotInVocabulary { field, allowed, .. } => {
                assert_eq!(field, "condition");
                assert_eq!(allowed, "[prototype, baseline]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut line = subject_task_line();
        line.insert("session_notes".to_string(), json!({"anything": [1, 2]}));
        assert!(SUBJECT_TASK.validate(&line, 1, "st.jsonl").is_ok());
    }

    #[test]
    fn test_state_transition_vocabulary() {
        let line = object(json!({
            "subject_id": 12,
            "condition": "baseline",
            "task_id": "Task2",
            "utc_timestamp": "2024-01-01T10:00:00Z",
            "state_id": "km_browse_activity"
        }));

        let err = STATE_TRANSITION.validate(&line, 4, "events.jsonl").unwrap_err();
        assert!(matches!(
            err,
            SchemaError::NotInVocabulary { field: "state_id", line: 4, .. }
        ));
    }

    #[test]
    fn test_label_accepts_integers_not_floats() {
        let mut line = subject_task_line();
        line.insert("subject_id".to_string(), json!(42));
        assert!(SUBJECT_TASK.validate(&line, 1, "st.jsonl").is_ok());

        line.insert("subject_id".to_string(), json!(4.2));
        assert!(SUBJECT_TASK.validate(&line, 1, "st.jsonl").is_err());
    }

    #[test]
    fn test_metadata_column_sets() {
        assert_eq!(
            TASK_METADATA.required_names(),
            vec!["task_id", "task_optimal_time_in_seconds", "task_maximum_score"]
        );
        assert_eq!(TASK_METADATA.optional_names(), vec!["task_passing_score"]);
        assert_eq!(
            TASK_METADATA.all_missing(|name| name == "task_id"),
            vec!["task_optimal_time_in_seconds", "task_maximum_score"]
        );
    }
}
