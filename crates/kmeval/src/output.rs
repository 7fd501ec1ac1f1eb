//! CSV and JSONL writers for command output.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use kmeval_metrics::TaskEvaluation;
use kmeval_records::{Reconciliation, SubjectTaskRecord, TaskMetadataEntry};
use serde_json::Value;

/// Record columns written to a summary, in order.
const RECORD_COLUMNS: [&str; 13] = [
    "subject_id",
    "condition",
    "task_id",
    "task_start_time",
    "task_total_time",
    "km_pull_total_time",
    "km_push_total_time",
    "task_grade",
    "corpus_knowledge_nugget_count",
    "expert_captured_knowledge_nugget_count",
    "nugget_content",
    "task_timeout",
    "optional_content",
];

/// A header plus rows of already-rendered cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn escape_field(field: &str) -> String {
        if field.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    fn format_row(row: &[String]) -> String {
        row.iter()
            .map(|f| Self::escape_field(f))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn to_csv(&self) -> String {
        let mut output = Self::format_row(&self.header);
        output.push('\n');
        for row in &self.rows {
            output.push_str(&Self::format_row(row));
            output.push('\n');
        }
        output
    }
}

/// Open `path` for writing, refusing to replace an existing file.
pub fn create_new(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            anyhow::bail!("Directory path {} does not exist", parent.display());
        }
    }

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => {
                anyhow::anyhow!("Output file path {} already exists", path.display())
            }
            _ => anyhow::Error::new(e).context(format!("Failed to create {}", path.display())),
        })
}

pub fn write_csv(path: &Path, table: &CsvTable) -> Result<()> {
    let mut file = create_new(path)?;
    file.write_all(table.to_csv().as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Write one compact JSON object per line.
pub fn write_jsonl(path: &Path, values: &[Value]) -> Result<()> {
    let mut writer = BufWriter::new(create_new(path)?);
    for value in values {
        serde_json::to_writer(&mut writer, value)?;
        writeln!(writer).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn metadata_columns(include_passing: bool) -> Vec<&'static str> {
    let mut columns = vec!["task_optimal_time_in_seconds", "task_maximum_score"];
    if include_passing {
        columns.push("task_passing_score");
    }
    columns
}

fn json_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn record_cells(record: &SubjectTaskRecord) -> Vec<String> {
    let assessment = record.assessment.as_ref();
    vec![
        record.subject_id.to_string(),
        record.condition.to_string(),
        record.task_id.to_string(),
        record.task_start_time.to_rfc3339(),
        record.task_total_time.to_string(),
        record.km_pull_total_time.to_string(),
        record.km_push_total_time.to_string(),
        assessment.map(|a| a.task_grade.to_string()).unwrap_or_default(),
        assessment
            .map(|a| a.corpus_knowledge_nugget_count.to_string())
            .unwrap_or_default(),
        assessment
            .map(|a| a.expert_captured_knowledge_nugget_count.to_string())
            .unwrap_or_default(),
        assessment
            .map(|a| Value::Array(a.nugget_content.clone()).to_string())
            .unwrap_or_default(),
        assessment
            .map(|a| a.task_timeout.to_string())
            .unwrap_or_default(),
        record
            .optional_content
            .as_ref()
            .map(json_cell)
            .unwrap_or_default(),
    ]
}

fn metadata_cells(entry: Option<&TaskMetadataEntry>, include_passing: bool) -> Vec<String> {
    let mut cells = vec![
        entry
            .map(|e| e.task_optimal_time_in_seconds.to_string())
            .unwrap_or_default(),
        entry
            .map(|e| e.task_maximum_score.to_string())
            .unwrap_or_default(),
    ];
    if include_passing {
        cells.push(
            entry
                .and_then(|e| e.task_passing_score)
                .map(|p| p.to_string())
                .unwrap_or_default(),
        );
    }
    cells
}

/// One row per session: record columns, then the task's metadata.
pub fn summary_table(reconciliation: &Reconciliation) -> CsvTable {
    let include_passing = reconciliation
        .metadata
        .values()
        .any(|e| e.task_passing_score.is_some());

    let header = RECORD_COLUMNS
        .iter()
        .chain(metadata_columns(include_passing).iter())
        .map(|c| c.to_string())
        .collect();
    let mut table = CsvTable::new(header);

    for record in reconciliation.records.values() {
        let entry = reconciliation.metadata.get(&record.task_id.to_string());
        let mut row = record_cells(record);
        row.extend(metadata_cells(entry, include_passing));
        table.push(row);
    }
    table
}

/// One row per task. The binarized column appears only when requested,
/// and is blank for tasks without a passing score.
pub fn evaluation_table(evaluations: &[TaskEvaluation], include_binarized: bool) -> CsvTable {
    let mut header: Vec<String> = [
        "task",
        "km_time_proportional_reduction",
        "prototype_time_relative_to_baseline_and_optimal",
        "proportional_task_failure_rate_reduction",
        "proportional_increase_in_productivity",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    if include_binarized {
        header.push("binarized_proportional_task_failure_rate".to_string());
    }

    let mut table = CsvTable::new(header);
    for evaluation in evaluations {
        let mut row = vec![
            evaluation.task.clone(),
            evaluation.km_time_proportional_reduction.to_string(),
            evaluation
                .prototype_time_relative_to_baseline_and_optimal
                .to_string(),
            evaluation.proportional_task_failure_rate_reduction.to_string(),
            evaluation.proportional_increase_in_productivity.to_string(),
        ];
        if include_binarized {
            row.push(
                evaluation
                    .binarized_proportional_task_failure_rate
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        table.push(row);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_escape_field() {
        assert_eq!(CsvTable::escape_field("plain"), "plain");
        assert_eq!(CsvTable::escape_field("a,b"), "\"a,b\"");
        assert_eq!(CsvTable::escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(CsvTable::escape_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_to_csv() {
        let mut table = CsvTable::new(vec!["task".to_string(), "value".to_string()]);
        table.push(vec!["Task1".to_string(), "0.5".to_string()]);
        table.push(vec!["Task, 2".to_string(), String::new()]);

        assert_eq!(table.to_csv(), "task,value\nTask1,0.5\n\"Task, 2\",\n");
    }

    #[test]
    fn test_create_new_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "existing").unwrap();

        let err = create_new(&path).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing");
    }

    #[test]
    fn test_create_new_needs_parent_dir() {
        let dir = TempDir::new().unwrap();
        let err = create_new(&dir.path().join("missing").join("out.csv")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_write_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.jsonl");
        let values = vec![serde_json::json!({"a": 1}), serde_json::json!({"b": [true]})];

        write_jsonl(&path, &values).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"a\":1}\n{\"b\":[true]}\n"
        );
    }

    #[test]
    fn test_evaluation_table_binarized_column() {
        let evaluation = TaskEvaluation {
            task: "Task1".to_string(),
            km_time_proportional_reduction: 0.5,
            prototype_time_relative_to_baseline_and_optimal: 0.75,
            proportional_task_failure_rate_reduction: -1.0,
            proportional_increase_in_productivity: f64::INFINITY,
            binarized_proportional_task_failure_rate: None,
        };

        let table = evaluation_table(&[evaluation.clone()], false);
        assert_eq!(table.header.len(), 5);
        assert_eq!(table.rows[0], vec!["Task1", "0.5", "0.75", "-1", "inf"]);

        let table = evaluation_table(&[evaluation], true);
        assert_eq!(table.header[5], "binarized_proportional_task_failure_rate");
        assert_eq!(table.rows[0][5], "");
    }
}
