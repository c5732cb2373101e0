//! User configuration.
//!
//! Settings are read from `~/.tileweave/config.ini`; every key is optional
//! and falls back to the library defaults.

mod file;
mod parser;
mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, ElevationSettings, FetchSettings, LoggingSettings, PoolSettings,
    ProducerSettings,
};
