pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "dealdesk",
    about = "Dealdesk operator CLI",
    long_about = "Validate deal submissions offline, inspect configuration, and check runtime readiness.",
    after_help = "Examples:\n  dealdesk validate deals.txt\n  dealdesk validate deals.txt --json\n  dealdesk doctor --json\n  dealdesk config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Parse and validate a deal submission file without writing to the store")]
    Validate {
        #[arg(help = "Path to a text file with one or more deals")]
        file: PathBuf,
        #[arg(long, help = "Emit the submission report as JSON")]
        json: bool,
        #[arg(long, help = "Treat unknown fields as errors instead of warnings")]
        strict: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, chat API reachability, and deal store connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Validate { file, json, strict } => commands::validate::run(&file, json, strict),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
