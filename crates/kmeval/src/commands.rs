use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kmeval_logging::{LogEvent, Logger};
use kmeval_metrics::evaluate_task;
use kmeval_records::{
    load_json_file, load_jsonl_file, load_task_metadata, ReconcileOptions, Reconciliation,
    RecordStore,
};
use serde_json::Value;
use tracing::debug;

use crate::output::{evaluation_table, summary_table, write_csv, write_jsonl};

/// Check one input file, returning the success message.
pub fn validate(input: &Path) -> Result<String> {
    match input.extension().and_then(|s| s.to_str()) {
        Some("jsonl") => {
            let loaded = load_jsonl_file(input)?;
            Ok(format!(
                "{} is a valid {} JSONL ({} sessions)",
                input.display(),
                loaded.shape.describe(),
                loaded.records.len()
            ))
        }
        Some("json") => {
            load_json_file(input)?;
            Ok(format!("{} is a valid Subject-Task JSON", input.display()))
        }
        Some("csv") => {
            let metadata = load_task_metadata(input)?;
            Ok(format!(
                "{} is a valid task metadata CSV ({} tasks)",
                input.display(),
                metadata.len()
            ))
        }
        _ => anyhow::bail!(
            "Unknown file type. File must be one of the following: .json, .jsonl, or .csv"
        ),
    }
}

/// Reconcile a directory, reporting each file and warning.
pub fn reconcile(input: &Path, options: &ReconcileOptions, logger: &Logger) -> Result<Reconciliation> {
    let reconciliation = RecordStore::with_dir(input)
        .with_options(options.clone())
        .reconcile()
        .with_context(|| format!("Failed to load directory {}", input.display()))?;

    for report in &reconciliation.files {
        logger.log(&LogEvent::FileLoaded {
            file: report.file.clone(),
            shape: report.shape.describe().to_string(),
            sessions: report.sessions,
        });
    }
    for warning in &reconciliation.warnings {
        logger.log(&LogEvent::ConsistencyWarning {
            key: warning.key.clone(),
            field: warning.field.as_str().to_string(),
            message: warning.to_string(),
        });
    }

    Ok(reconciliation)
}

/// Write the per-session summary CSV. Returns the number of rows written.
pub fn summary(
    input: &Path,
    output: &Path,
    options: &ReconcileOptions,
    logger: &Logger,
) -> Result<(Reconciliation, usize)> {
    let reconciliation = reconcile(input, options, logger)?;

    if reconciliation.metadata.is_empty() {
        anyhow::bail!(
            "There is no {} spreadsheet in your input directory: {}",
            options.metadata_file_name,
            input.display()
        );
    }

    let table = summary_table(&reconciliation);
    write_csv(output, &table)?;
    let rows = table.rows.len();
    Ok((reconciliation, rows))
}

/// Write the per-task metrics CSV. Returns the number of rows written.
pub fn evaluate(
    input: &Path,
    output: &Path,
    options: &ReconcileOptions,
    logger: &Logger,
) -> Result<(Reconciliation, usize)> {
    let reconciliation = reconcile(input, options, logger)?;

    let evaluations = reconciliation
        .metadata
        .iter()
        .map(|(task, entry)| {
            evaluate_task(&reconciliation.records, task, entry)
                .with_context(|| format!("Failed to evaluate task {}", task))
        })
        .collect::<Result<Vec<_>>>()?;

    let include_binarized = reconciliation
        .metadata
        .values()
        .any(|e| e.task_passing_score.is_some());
    let table = evaluation_table(&evaluations, include_binarized);
    write_csv(output, &table)?;
    Ok((reconciliation, evaluations.len()))
}

/// What `condense` produced.
#[derive(Debug, Default, PartialEq)]
pub struct CondenseReport {
    pub subject_task_path: PathBuf,
    pub subject_tasks: usize,
    pub state_transitions_path: PathBuf,
    pub state_transitions: usize,
    /// `None` when the input had no metadata table to copy.
    pub metadata_path: Option<PathBuf>,
}

pub const CONDENSED_SUBJECT_TASK_FILE: &str = "subject_task.jsonl";
pub const CONDENSED_STATE_TRANSITIONS_FILE: &str = "state_transitions.jsonl";

/// Gather every `.json` object and every `.jsonl` line of a directory into
/// two JSONL files, copying the metadata table alongside. Content is not
/// validated.
pub fn condense(input: &Path, output: &Path, options: &ReconcileOptions) -> Result<CondenseReport> {
    let mut paths = fs::read_dir(input)
        .with_context(|| format!("Failed to read directory {}", input.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read directory {}", input.display()))?;
    paths.sort();

    let mut subject_tasks = Vec::new();
    let mut state_transitions = Vec::new();

    for path in paths.iter().filter(|p| p.is_file()) {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let value: Value = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                subject_tasks.push(value);
            }
            Some("jsonl") => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                for (index, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let value: Value = serde_json::from_str(line).with_context(|| {
                        format!("Failed to parse line {} of {}", index + 1, path.display())
                    })?;
                    state_transitions.push(value);
                }
            }
            _ => debug!(file = %path.display(), "Not condensed"),
        }
    }

    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create directory {}", output.display()))?;

    let subject_task_path = output.join(CONDENSED_SUBJECT_TASK_FILE);
    write_jsonl(&subject_task_path, &subject_tasks)?;
    let state_transitions_path = output.join(CONDENSED_STATE_TRANSITIONS_FILE);
    write_jsonl(&state_transitions_path, &state_transitions)?;

    let metadata_source = input.join(&options.metadata_file_name);
    let metadata_path = if metadata_source.is_file() {
        let target = output.join(&options.metadata_file_name);
        fs::copy(&metadata_source, &target).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                metadata_source.display(),
                target.display()
            )
        })?;
        Some(target)
    } else {
        None
    };

    Ok(CondenseReport {
        subject_task_path,
        subject_tasks: subject_tasks.len(),
        state_transitions_path,
        state_transitions: state_transitions.len(),
        metadata_path,
    })
}
