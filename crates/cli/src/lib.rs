pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use triage_core::config::{AppConfig, LoadOptions, LogFormat};
use triage_core::EVALUATIONS_QUEUE;

#[derive(Debug, Parser)]
#[command(
    name = "triage",
    about = "Triage operator CLI",
    long_about = "Operate the conversation triage service: migrations, readiness checks, config inspection, and evaluation queue tooling.",
    after_help = "Examples:\n  triage doctor --json\n  triage queue-status --queue evaluations\n  triage dispatch --conversation-id conv-42 --evaluator llm_judge"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, database connectivity, and task queue readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Report how many tasks are waiting on a queue")]
    QueueStatus {
        #[arg(long, default_value = EVALUATIONS_QUEUE, help = "Queue name")]
        queue: String,
    },
    #[command(about = "Queue an evaluation task for a stored conversation")]
    Dispatch {
        #[arg(long, help = "Conversation to evaluate")]
        conversation_id: String,
        #[arg(
            long = "evaluator",
            value_name = "TYPE",
            help = "Evaluator type; repeat for several, omit for the configured defaults"
        )]
        evaluators: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Config => commands::config::run(),
        Command::QueueStatus { queue } => commands::queue_status::run(&queue),
        Command::Dispatch { conversation_id, evaluators } => {
            commands::dispatch::run(&conversation_id, &evaluators)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a single JSON document. Without a
/// loadable config only warnings are shown; the command reports the config
/// error itself.
fn init_logging() {
    use tracing::Level;

    let (level, format) = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => (
            config.logging.level.parse::<Level>().unwrap_or(Level::INFO),
            config.logging.format,
        ),
        Err(_) => (Level::WARN, LogFormat::Compact),
    };

    let builder =
        tracing_subscriber::fmt().with_writer(std::io::stderr).with_target(false).with_max_level(level);
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
