//! Configuration file support for kmeval.
//!
//! Settings come from `kmeval.toml`, found via `--config`, then the
//! working directory, then the user config directory. Command-line flags
//! override the file.

use anyhow::{Context, Result};
use kmeval_logging::LogFormat;
use kmeval_records::ReconcileOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of `kmeval.toml`
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Allowed disagreement between two sources' timing aggregates
    pub time_tolerance_secs: Option<f64>,
    /// Name of the task-metadata table inside an input directory
    pub metadata_file: Option<String>,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    pub level: Option<String>,
    /// pretty, json or compact
    pub format: Option<String>,
}

/// The config file name
pub const CONFIG_FILE_NAME: &str = "kmeval.toml";

const DEFAULT_LOG_LEVEL: &str = "info";

impl Config {
    /// Load configuration.
    ///
    /// Returns:
    /// - `Ok(Some((config, path)))` for the first file found
    /// - `Ok(None)` if no file exists and none was named
    /// - `Err(...)` if the named file is missing or any file fails to parse
    pub fn load(explicit: Option<&Path>, working_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file {} does not exist", path.display());
            }
            return Ok(Some((Self::from_path(path)?, path.to_path_buf())));
        }

        for path in Self::candidates(working_dir) {
            if path.exists() {
                let config = Self::from_path(&path)?;
                return Ok(Some((config, path)));
            }
        }
        Ok(None)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn candidates(working_dir: &Path) -> Vec<PathBuf> {
        let mut paths = vec![working_dir.join(CONFIG_FILE_NAME)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("kmeval").join(CONFIG_FILE_NAME));
        }
        paths
    }

    pub fn reconcile_options(&self) -> Result<ReconcileOptions> {
        let defaults = ReconcileOptions::default();

        let time_tolerance_secs = self
            .time_tolerance_secs
            .unwrap_or(defaults.time_tolerance_secs);
        if !time_tolerance_secs.is_finite() || time_tolerance_secs < 0.0 {
            anyhow::bail!(
                "time_tolerance_secs must be a non-negative number (found {})",
                time_tolerance_secs
            );
        }

        Ok(ReconcileOptions {
            time_tolerance_secs,
            metadata_file_name: self
                .metadata_file
                .clone()
                .unwrap_or(defaults.metadata_file_name),
        })
    }
}

/// Everything a command needs to know about how to run.
#[derive(Debug)]
pub struct Settings {
    pub options: ReconcileOptions,
    pub log_level: String,
    pub log_format: LogFormat,
    pub config_path: Option<PathBuf>,
}

impl Settings {
    /// Merge the config file with command-line overrides.
    /// Priority: flag > config file > default
    pub fn resolve(
        explicit_config: Option<&Path>,
        working_dir: &Path,
        log_level: Option<&str>,
        log_format: Option<LogFormat>,
    ) -> Result<Self> {
        let (config, config_path) = match Config::load(explicit_config, working_dir)? {
            Some((config, path)) => (config, Some(path)),
            None => (Config::default(), None),
        };

        let log_format = match (log_format, config.log.format.as_deref()) {
            (Some(format), _) => format,
            (None, Some(text)) => text.parse::<LogFormat>().map_err(anyhow::Error::msg)?,
            (None, None) => LogFormat::default(),
        };

        Ok(Self {
            options: config.reconcile_options()?,
            log_level: log_level
                .or(config.log.level.as_deref())
                .unwrap_or(DEFAULT_LOG_LEVEL)
                .to_string(),
            log_format,
            config_path,
        })
    }
}
