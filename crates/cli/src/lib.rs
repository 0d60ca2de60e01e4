pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "expenso",
    about = "Expenso approval engine operator CLI",
    long_about = "Apply migrations, inspect configuration, validate approval matrices, and preview approver chains.",
    after_help = "Examples:\n  expenso migrate\n  expenso check-matrix matrix.toml\n  expenso route scenario.toml"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate an approval matrix document against the level invariants")]
    CheckMatrix {
        #[arg(help = "Path to a TOML matrix document")]
        path: PathBuf,
    },
    #[command(about = "Build the approver chain for a TOML scenario and replay its actions")]
    Route {
        #[arg(help = "Path to a TOML routing scenario")]
        path: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::CheckMatrix { path } => commands::check_matrix::run(&path),
        Command::Route { path } => commands::route::run(&path),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
