//! Tileweave CLI - Command-line interface
//!
//! Drives the tileweave coordinator against in-memory or HTTP tile sources
//! and manages the user configuration file.

mod commands;
mod error;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;

#[derive(Debug, Parser)]
#[command(name = "tileweave", version, about = "Multi-source tile loading coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load a batch of tiles and report when each becomes ready
    Simulate(SimulateArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate(args) => commands::simulate::run(args),
        Commands::Config { command } => commands::config::run(command),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate_flags() {
        let cli = Cli::parse_from([
            "tileweave",
            "simulate",
            "--tiles",
            "12",
            "--zoom",
            "5",
            "--fail-elevation-every",
            "4",
        ]);
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.tiles, 12);
        assert_eq!(args.zoom, 5);
        assert_eq!(args.fail_elevation_every, Some(4));
    }
}
