use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

/// Run-level milestones of a kmeval command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    RunStarted {
        command: String,
        input: PathBuf,
    },
    FileLoaded {
        file: String,
        shape: String,
        sessions: usize,
    },
    /// Two sources disagree on a timing aggregate beyond the tolerance.
    ConsistencyWarning {
        key: String,
        field: String,
        message: String,
    },
    RunCompleted {
        command: String,
        sessions: usize,
        warnings: usize,
        duration_secs: f64,
    },
    OutputWritten {
        path: PathBuf,
        rows: usize,
    },
    RunFailed {
        command: String,
        error: String,
    },
}

impl LogEvent {
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Reports [`LogEvent`]s on stderr in the chosen format.
pub struct Logger {
    format: LogFormat,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn log(&self, event: &LogEvent) {
        let _ = writeln!(std::io::stderr(), "{}", self.render(event));
    }

    /// The line `log` prints for `event`.
    pub fn render(&self, event: &LogEvent) -> String {
        match self.format {
            LogFormat::Json => event.with_timestamp().to_string(),
            LogFormat::Pretty => Self::render_pretty(event),
            LogFormat::Compact => Self::render_compact(event),
        }
    }

    fn render_pretty(event: &LogEvent) -> String {
        match event {
            LogEvent::RunStarted { command, input } => format!(
                "{} {} {}",
                "kmeval".bold().bright_white(),
                command.bright_cyan().bold(),
                input.display().to_string().dimmed()
            ),
            LogEvent::FileLoaded {
                file,
                shape,
                sessions,
            } => format!(
                "  {} {} {}",
                "✓".bright_green(),
                file,
                format!(
                    "({}, {} {})",
                    shape,
                    sessions,
                    if *sessions == 1 { "session" } else { "sessions" }
                )
                .dimmed()
            ),
            LogEvent::ConsistencyWarning { message, .. } => {
                format!("  {} {}", "⚠".bright_yellow(), message.yellow())
            }
            LogEvent::RunCompleted {
                sessions,
                warnings,
                duration_secs,
                ..
            } => {
                let warnings = if *warnings == 0 {
                    "no warnings".dimmed().to_string()
                } else {
                    format!(
                        "{} {}",
                        warnings,
                        if *warnings == 1 { "warning" } else { "warnings" }
                    )
                    .bright_yellow()
                    .to_string()
                };
                format!(
                    "{} {} sessions reconciled, {} ({:.2}s)",
                    "✓".bright_green(),
                    sessions,
                    warnings,
                    duration_secs
                )
            }
            LogEvent::OutputWritten { path, rows } => format!(
                "{} Wrote {} {} to {}",
                "→".bright_blue(),
                rows,
                if *rows == 1 { "row" } else { "rows" },
                path.display()
            ),
            LogEvent::RunFailed { error, .. } => {
                format!("{} {}", "✗".bright_red(), error.bright_red())
            }
        }
    }

    fn render_compact(event: &LogEvent) -> String {
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        match event {
            LogEvent::RunStarted { command, input } => {
                format!("[{}] run:start:{} {}", timestamp, command, input.display())
            }
            LogEvent::FileLoaded {
                file,
                shape,
                sessions,
            } => format!("[{}] file:{} {} n={}", timestamp, file, shape, sessions),
            LogEvent::ConsistencyWarning { key, field, .. } => {
                format!("[{}] warn:{} {}", timestamp, key, field)
            }
            LogEvent::RunCompleted {
                command,
                sessions,
                warnings,
                duration_secs,
            } => format!(
                "[{}] run:done:{} n={} w={} {:.2}s",
                timestamp, command, sessions, warnings, duration_secs
            ),
            LogEvent::OutputWritten { path, rows } => {
                format!("[{}] out:{} rows={}", timestamp, path.display(), rows)
            }
            LogEvent::RunFailed { command, error } => {
                format!("[{}] run:fail:{} {}", timestamp, command, error)
            }
        }
    }
}
