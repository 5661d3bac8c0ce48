pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use frontdesk_core::scoring::DEFAULT_HOT_THRESHOLD;

#[derive(Debug, Parser)]
#[command(
    name = "frontdesk",
    about = "Frontdesk operator CLI",
    long_about = "Operate the Frontdesk receptionist runtime: migrations, config inspection, readiness checks and lead score explanations.",
    after_help = "Examples:\n  frontdesk doctor --json\n  frontdesk config\n  frontdesk explain-score --profile lead.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model credentials, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Score a JSON lead profile and print the operator-facing explanation")]
    ExplainScore {
        #[arg(long, help = "Path to a JSON lead profile")]
        profile: PathBuf,
        #[arg(long, help = "Optional JSON array of scoring rules to apply")]
        rules: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_HOT_THRESHOLD, help = "Score at which a lead is hot")]
        threshold: u8,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::ExplainScore { profile, rules, threshold } => {
            commands::explain_score::run(&profile, rules.as_deref(), threshold)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
