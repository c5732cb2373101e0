//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.

use std::time::Duration;

use crate::decode::{ElevationEncoding, DEFAULT_ELEVATION_OFFSET, DEFAULT_ELEVATION_RESOLUTION};
use crate::fetch::{FetchError, HttpFetchBackend, DEFAULT_FETCH_TIMEOUT_SECS};
use crate::logging::{default_log_dir, default_log_file, LogFormat, DEFAULT_LOG_LEVEL};
use crate::producer::{WorkerConfig, DEFAULT_MAX_IN_FLIGHT, DEFAULT_TICK_INTERVAL};
use crate::tile::DEFAULT_POOL_CAPACITY;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    /// Producer worker scheduling
    pub producer: ProducerSettings,
    /// Tile record reuse
    pub pool: PoolSettings,
    /// Elevation payload encoding
    pub elevation: ElevationSettings,
    /// Remote fetch backend
    pub fetch: FetchSettings,
    /// Log output
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Worker settings shared by every producer.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_in_flight: self.producer.max_in_flight,
            tick_interval: Duration::from_millis(self.producer.tick_interval_ms),
        }
    }

    pub fn elevation_encoding(&self) -> ElevationEncoding {
        ElevationEncoding::new(self.elevation.offset, self.elevation.resolution)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Jobs fetching or decoding at once, per producer.
    pub max_in_flight: usize,
    /// Scheduling tick in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Recycled tile records kept for reuse.
    pub capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

/// Fixed-point height decoding: `offset + (r*65536 + g*256 + b) * resolution`.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationSettings {
    pub offset: f32,
    pub resolution: f32,
}

impl Default for ElevationSettings {
    fn default() -> Self {
        Self {
            offset: DEFAULT_ELEVATION_OFFSET,
            resolution: DEFAULT_ELEVATION_RESOLUTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    /// URL template with `{z}`, `{x}`, `{y}` and `{kind}` placeholders.
    pub url_template: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl FetchSettings {
    /// HTTP backend for the configured template, if one is set.
    pub fn http_backend(&self) -> Result<Option<HttpFetchBackend>, FetchError> {
        self.url_template
            .as_deref()
            .map(|template| {
                HttpFetchBackend::with_timeout(template, Duration::from_secs(self.timeout_secs))
            })
            .transpose()
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            url_template: None,
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: String,
    pub file: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Stdout layout.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_dir().to_string(),
            file: default_log_file().to_string(),
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::default(),
        }
    }
}
