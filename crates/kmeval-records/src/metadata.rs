//! The task-metadata table: optimal time and scoring per task.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{LoadError, MetadataError};
use crate::schema::{FieldType, TASK_METADATA};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskMetadataEntry {
    pub task_optimal_time_in_seconds: f64,
    pub task_maximum_score: i64,
    /// Blank cells and tables without the column both read as `None`.
    pub task_passing_score: Option<f64>,
}

/// Metadata keyed by task id.
pub type TaskMetadata = BTreeMap<String, TaskMetadataEntry>;

pub fn load_task_metadata(path: &Path) -> Result<TaskMetadata, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
    Ok(parse_task_metadata(&content, &path.display().to_string())?)
}

/// Parse the CSV text of a metadata table.
///
/// The header must name every required column and nothing outside the
/// required and optional sets. Cells are looked up by header name. A row
/// may stop early only when every column it leaves out is optional.
pub fn parse_task_metadata(content: &str, file: &str) -> Result<TaskMetadata, MetadataError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut rows = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| (index + 1, line));

    let Some((header_row, header_line)) = rows.next() else {
        return Err(MetadataError::Empty {
            file: file.to_string(),
        });
    };
    let header = split_row(header_line, header_row, file)?;
    let columns = verify_columns(&header, file)?;

    let mut tasks = TaskMetadata::new();
    for (row_no, line) in rows {
        let cells = split_row(line, row_no, file)?;
        let trailing_optional = header[cells.len().min(header.len())..].iter().all(|name| {
            TASK_METADATA
                .field(name.trim())
                .is_some_and(|spec| !spec.required)
        });
        if cells.len() > header.len() || !trailing_optional {
            return Err(MetadataError::FieldCount {
                row: row_no,
                expected: header.len(),
                found: cells.len(),
                file: file.to_string(),
            });
        }

        // Cells past the end of a short row read as absent.
        let cell = |name: &str| {
            columns
                .get(name)
                .and_then(|&i| cells.get(i))
                .map(|value| value.trim())
        };
        let task_id = cell("task_id").unwrap_or_default().to_string();
        let entry = TaskMetadataEntry {
            task_optimal_time_in_seconds: parse_float(
                "task_optimal_time_in_seconds",
                cell("task_optimal_time_in_seconds").unwrap_or_default(),
                row_no,
                file,
            )?,
            task_maximum_score: parse_integer(
                "task_maximum_score",
                cell("task_maximum_score").unwrap_or_default(),
                row_no,
                file,
            )?,
            task_passing_score: match cell("task_passing_score") {
                Some(value) if !value.is_empty() => {
                    Some(parse_float("task_passing_score", value, row_no, file)?)
                }
                _ => None,
            },
        };
        tasks.insert(task_id, entry);
    }

    Ok(tasks)
}

/// Map each known column name to its position, rejecting missing,
/// unknown and repeated columns.
fn verify_columns(
    header: &[String],
    file: &str,
) -> Result<BTreeMap<&'static str, usize>, MetadataError> {
    let names: Vec<&str> = header.iter().map(|h| h.trim()).collect();

    let missing = TASK_METADATA.all_missing(|name| names.contains(&name));
    if !missing.is_empty() {
        return Err(MetadataError::MissingColumns {
            columns: missing.iter().map(|c| c.to_string()).collect(),
            required: TASK_METADATA.required_names(),
            optional: TASK_METADATA.optional_names(),
            file: file.to_string(),
        });
    }

    let extra: Vec<String> = names
        .iter()
        .filter(|name| TASK_METADATA.field(name).is_none())
        .map(|name| name.to_string())
        .collect();
    if !extra.is_empty() {
        return Err(MetadataError::ExtraColumns {
            columns: extra,
            required: TASK_METADATA.required_names(),
            optional: TASK_METADATA.optional_names(),
            file: file.to_string(),
        });
    }

    let mut columns = BTreeMap::new();
    for (index, name) in names.iter().enumerate() {
        if let Some(spec) = TASK_METADATA.field(name) {
            if columns.insert(spec.name, index).is_some() {
                return Err(MetadataError::DuplicateColumn {
                    column: spec.name.to_string(),
                    file: file.to_string(),
                });
            }
        }
    }
    Ok(columns)
}

fn parse_float(column: &'static str, value: &str, row: usize, file: &str) -> Result<f64, MetadataError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .ok_or_else(|| invalid(column, value, row, file))
}

fn parse_integer(column: &'static str, value: &str, row: usize, file: &str) -> Result<i64, MetadataError> {
    value
        .parse::<i64>()
        .map_err(|_| invalid(column, value, row, file))
}

fn invalid(column: &'static str, value: &str, row: usize, file: &str) -> MetadataError {
    let expected = TASK_METADATA
        .field(column)
        .map(|spec| match spec.ty {
            FieldType::Integer => "an integer",
            _ => "a number",
        })
        .unwrap_or("valid");
    MetadataError::InvalidValue {
        row,
        column,
        value: value.to_string(),
        expected,
        file: file.to_string(),
    }
}

/// Split one CSV line, honouring double-quoted fields with `""` escapes.
fn split_row(line: &str, row: usize, file: &str) -> Result<Vec<String>, MetadataError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(MetadataError::UnterminatedQuote {
            row,
            file: file.to_string(),
        });
    }
    fields.push(current);
    Ok(fields)
}
