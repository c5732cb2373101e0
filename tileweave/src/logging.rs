//! Logging setup.
//!
//! Structured logging to a file and to stdout, driven by the `[logging]`
//! section of config.ini:
//! - `directory` / `file`: log file location, truncated on every start
//! - `level`: filter directive used when `RUST_LOG` is unset
//! - `format`: stdout layout (`compact`, `pretty` or `full`)

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Filter directive applied when neither `RUST_LOG` nor config set one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Layout of the stdout log layer. The file layer always uses the full
/// layout without colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Full,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Pretty => "pretty",
            LogFormat::Full => "full",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "full" => Ok(LogFormat::Full),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Installs the global subscriber described by `settings`.
///
/// # Errors
///
/// Fails if the log directory cannot be created, the file cannot be
/// truncated, `settings.level` is not a valid filter, or a global subscriber
/// is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<LoggingGuard, io::Error> {
    let filter = env_filter(&settings.level)?;

    fs::create_dir_all(&settings.directory)?;
    fs::write(Path::new(&settings.directory).join(&settings.file), "")?;

    let file_appender = tracing_appender::rolling::never(&settings.directory, &settings.file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    // Only one of these is Some
    let format = settings.format;
    let compact = (format == LogFormat::Compact)
        .then(|| tracing_subscriber::fmt::layer().with_writer(io::stdout).compact());
    let pretty = (format == LogFormat::Pretty)
        .then(|| tracing_subscriber::fmt::layer().with_writer(io::stdout).pretty());
    let full = (format == LogFormat::Full)
        .then(|| tracing_subscriber::fmt::layer().with_writer(io::stdout));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(compact)
        .with(pretty)
        .with(full)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// `RUST_LOG` if set and valid, otherwise `level`.
fn env_filter(level: &str) -> Result<EnvFilter, io::Error> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => parse_level(level),
    }
}

/// Parses a filter directive such as `info` or `info,tileweave=debug`.
pub fn parse_level(level: &str) -> Result<EnvFilter, io::Error> {
    EnvFilter::try_new(level).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Default log directory.
pub fn default_log_dir() -> &'static str {
    "logs"
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "tileweave.log"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(directory: &Path, file: &str) -> LoggingSettings {
        LoggingSettings {
            directory: directory.to_str().unwrap().to_string(),
            file: file.to_string(),
            ..LoggingSettings::default()
        }
    }

    #[test]
    fn test_defaults() {
        let defaults = LoggingSettings::default();
        assert_eq!(defaults.directory, "logs");
        assert_eq!(defaults.file, "tileweave.log");
        assert_eq!(defaults.level, DEFAULT_LOG_LEVEL);
        assert_eq!(defaults.format, LogFormat::Compact);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!(" full ".parse::<LogFormat>().unwrap(), LogFormat::Full);
        assert!("json".parse::<LogFormat>().is_err());
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Full] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_level_directives() {
        assert!(parse_level("debug").is_ok());
        assert!(parse_level("warn,tileweave::producer=trace").is_ok());

        let err = parse_level("tileweave=loudest").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    // init_logging installs a process-wide subscriber, so only one test may
    // succeed in calling it.
    #[test]
    fn test_init_creates_and_truncates_log_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("nested").join("logs");
        fs::create_dir_all(&log_dir).unwrap();
        fs::write(log_dir.join("run.log"), "old log data").unwrap();

        let mut settings = settings(&log_dir, "run.log");
        settings.format = LogFormat::Full;
        let result = init_logging(&settings);

        let contents = fs::read_to_string(log_dir.join("run.log")).unwrap();
        assert!(!contents.contains("old log data"));
        // Another test binary may already own the global subscriber
        if let Ok(guard) = result {
            tracing::info!("logging initialized");
            drop(guard);
        }
    }

    #[test]
    fn test_unwritable_directory_is_an_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, "").unwrap();

        let result = init_logging(&settings(&blocker.join("logs"), "run.log"));
        assert!(result.is_err());
    }
}
