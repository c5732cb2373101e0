//! CLI error type.

use thiserror::Error;
use tileweave::config::ConfigFileError;
use tileweave::coord::CoordError;
use tileweave::error::ProducerError;
use tileweave::fetch::FetchError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigFileError),

    #[error("Failed to initialize logging: {0}")]
    Logging(std::io::Error),

    #[error("Failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("Failed to start runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Invalid tile: {0}")]
    Coord(#[from] CoordError),

    #[error("Failed to set up fetch backend: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Producer(#[from] ProducerError),
}
