//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show` and `config init`.

use clap::Subcommand;
use tileweave::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration
    Show,

    /// Write a default configuration file if none exists
    Init,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(),
        ConfigCommands::Show => run_show(),
        ConfigCommands::Init => run_init(),
    }
}

fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}

/// Print the effective configuration, defaults filled in.
fn run_show() -> Result<(), CliError> {
    let path = config_file_path();
    let config = ConfigFile::load_from(&path)?;

    if path.exists() {
        println!("# Loaded from {}", path.display());
    } else {
        println!("# {} not found, showing defaults", path.display());
    }
    println!();
    print!("{}", config.to_ini_string());
    Ok(())
}

fn run_init() -> Result<(), CliError> {
    let path = config_file_path();
    if ConfigFile::ensure_exists_at(&path)? {
        println!("Created configuration file: {}", path.display());
    } else {
        println!("Configuration file already exists: {}", path.display());
    }
    println!();
    println!("Edit this file to customize tileweave settings.");
    println!("CLI arguments override config file values when specified.");
    Ok(())
}
