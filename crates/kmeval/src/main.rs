mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use kmeval_logging::{init_tracing, LogEvent, LogFormat, Logger};
use kmeval_records::Reconciliation;

use config::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "kmeval",
    about = "Validate, reconcile and evaluate usability-study task logs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a kmeval.toml (default: ./kmeval.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter; RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatChoice>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that one .jsonl, .json or .csv input file is well formed
    Validate {
        /// File to check
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Write one CSV row per reconciled session, joined with task metadata
    Summary {
        /// Directory of record files and the task metadata table
        #[arg(short, long)]
        input: PathBuf,

        /// CSV file to create
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compute prototype-versus-baseline metrics for every task
    Evaluate {
        /// Directory of record files and the task metadata table
        #[arg(short, long)]
        input: PathBuf,

        /// CSV file to create
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Combine a directory's JSON and JSONL files into two JSONL files
    Condense {
        /// Directory of JSON and JSONL files
        #[arg(short, long)]
        input: PathBuf,

        /// Directory to write the combined files to
        #[arg(short, long)]
        output: PathBuf,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Validate { .. } => "validate",
            Command::Summary { .. } => "summary",
            Command::Evaluate { .. } => "evaluate",
            Command::Condense { .. } => "condense",
        }
    }

    fn input(&self) -> &PathBuf {
        match self {
            Command::Validate { input }
            | Command::Summary { input, .. }
            | Command::Evaluate { input, .. }
            | Command::Condense { input, .. } => input,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {:#}", "ERROR:".bright_red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&settings.log_level, settings.log_format);
    if let Some(ref path) = settings.config_path {
        tracing::debug!(config = %path.display(), "Loaded configuration");
    }

    let logger = Logger::new(settings.log_format);
    let command = cli.command.name();

    match run(cli.command, &settings, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.log(&LogEvent::RunFailed {
                command: command.to_string(),
                error: format!("{:#}", e),
            });
            ExitCode::FAILURE
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let working_dir = std::env::current_dir().context("Failed to get current directory")?;
    Settings::resolve(
        cli.config.as_deref(),
        &working_dir,
        cli.log_level.as_deref(),
        cli.log_format.map(LogFormat::from),
    )
}

fn run(command: Command, settings: &Settings, logger: &Logger) -> Result<()> {
    let start = Instant::now();
    let name = command.name();
    logger.log(&LogEvent::RunStarted {
        command: name.to_string(),
        input: command.input().clone(),
    });

    match command {
        Command::Validate { input } => {
            let message = commands::validate(&input)?;
            println!("{} {}", "Success:".bright_green().bold(), message);
        }
        Command::Summary { input, output } => {
            let (reconciliation, rows) =
                commands::summary(&input, &output, &settings.options, logger)?;
            report_completed(logger, name, &reconciliation, start);
            logger.log(&LogEvent::OutputWritten { path: output, rows });
        }
        Command::Evaluate { input, output } => {
            let (reconciliation, rows) =
                commands::evaluate(&input, &output, &settings.options, logger)?;
            report_completed(logger, name, &reconciliation, start);
            logger.log(&LogEvent::OutputWritten { path: output, rows });
        }
        Command::Condense { input, output } => {
            let report = commands::condense(&input, &output, &settings.options)?;
            logger.log(&LogEvent::OutputWritten {
                path: report.subject_task_path,
                rows: report.subject_tasks,
            });
            logger.log(&LogEvent::OutputWritten {
                path: report.state_transitions_path,
                rows: report.state_transitions,
            });
            if report.metadata_path.is_none() {
                println!(
                    "{} {} is required to process evaluation results.",
                    "NOTE:".bright_yellow().bold(),
                    settings.options.metadata_file_name
                );
                println!(
                    "Please re-run and add to {}, or manually place in {}",
                    input.display(),
                    output.display()
                );
            }
        }
    }

    Ok(())
}

fn report_completed(
    logger: &Logger,
    command: &str,
    reconciliation: &Reconciliation,
    start: Instant,
) {
    logger.log(&LogEvent::RunCompleted {
        command: command.to_string(),
        sessions: reconciliation.records.len(),
        warnings: reconciliation.warnings.len(),
        duration_secs: start.elapsed().as_secs_f64(),
    });
}
