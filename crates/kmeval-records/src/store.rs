use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::LoadError;
use crate::merge::{ConsistencyWarning, Reconciler};
use crate::metadata::{load_task_metadata, TaskMetadata};
use crate::parser::{load_path, FileShape};
use crate::types::{SessionKey, SubjectTaskRecord};

/// Largest difference, in seconds, between two sources' timing
/// aggregates that passes without a warning.
pub const DEFAULT_TIME_TOLERANCE_SECS: f64 = 1.0;

/// Name of the task-metadata table inside an input directory.
pub const TASK_METADATA_FILE: &str = "task_metadata.csv";

/// Tunables for one reconciliation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOptions {
    pub time_tolerance_secs: f64,
    pub metadata_file_name: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            time_tolerance_secs: DEFAULT_TIME_TOLERANCE_SECS,
            metadata_file_name: TASK_METADATA_FILE.to_string(),
        }
    }
}

/// What one input file contributed.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub file: String,
    pub shape: FileShape,
    pub sessions: usize,
}

/// The outcome of reconciling a directory.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// One canonical record per session.
    pub records: BTreeMap<SessionKey, SubjectTaskRecord>,
    /// File each record's base fields were last confirmed by.
    pub provenance: BTreeMap<SessionKey, String>,
    /// Empty when the directory has no metadata table.
    pub metadata: TaskMetadata,
    pub warnings: Vec<ConsistencyWarning>,
    pub files: Vec<FileReport>,
}

impl Reconciliation {
    /// Records keyed by their `{subject}_{condition}_{task}` string.
    pub fn by_key_string(&self) -> BTreeMap<String, &SubjectTaskRecord> {
        self.records
            .iter()
            .map(|(key, record)| (key.to_string(), record))
            .collect()
    }
}

/// Loads and reconciles every record file in one directory.
pub struct RecordStore {
    dir: PathBuf,
    options: ReconcileOptions,
}

impl RecordStore {
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Load every file and merge sessions across files.
    ///
    /// Entries are visited in file-name order. The first fatal error aborts
    /// the run; tolerance mismatches are logged and collected.
    pub fn reconcile(&self) -> Result<Reconciliation, LoadError> {
        let mut reconciler = Reconciler::new(self.options.time_tolerance_secs);
        let mut metadata = TaskMetadata::new();
        let mut files = Vec::new();

        for path in self.list_files()? {
            let name = file_name(&path);

            if name == self.options.metadata_file_name {
                metadata = load_task_metadata(&path)?;
                info!(file = %name, tasks = metadata.len(), "Loaded task metadata");
                continue;
            }

            let Some(loaded) = load_path(&path)? else {
                debug!(file = %name, "Skipping file with unsupported extension");
                continue;
            };

            let sessions = loaded.records.len();
            info!(
                file = %name,
                shape = loaded.shape.describe(),
                sessions,
                "Loaded record file"
            );
            reconciler.absorb(loaded.records, &name)?;
            files.push(FileReport {
                file: name,
                shape: loaded.shape,
                sessions,
            });
        }

        let (records, provenance, warnings) = reconciler.finish();
        info!(
            dir = %self.dir.display(),
            sessions = records.len(),
            files = files.len(),
            warnings = warnings.len(),
            "Reconciled directory"
        );

        Ok(Reconciliation {
            records,
            provenance,
            metadata,
            warnings,
            files,
        })
    }

    fn list_files(&self) -> Result<Vec<PathBuf>, LoadError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| LoadError::io(&self.dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LoadError::io(&self.dir, e))?;
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
        Ok(paths)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
