//! INI parsing: `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parses an `Ini` into a `ConfigFile`, starting from defaults and
/// overlaying every value present.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [producer] section
    if let Some(section) = ini.section(Some("producer")) {
        if let Some(v) = parse_value::<usize>(section, "producer", "max_in_flight")? {
            if v == 0 {
                return Err(invalid("producer", "max_in_flight", "0", "must be at least 1"));
            }
            config.producer.max_in_flight = v;
        }
        if let Some(v) = parse_value::<u64>(section, "producer", "tick_interval_ms")? {
            if v == 0 {
                return Err(invalid("producer", "tick_interval_ms", "0", "must be at least 1"));
            }
            config.producer.tick_interval_ms = v;
        }
    }

    // [pool] section
    if let Some(section) = ini.section(Some("pool")) {
        if let Some(v) = parse_value::<usize>(section, "pool", "capacity")? {
            config.pool.capacity = v;
        }
    }

    // [elevation] section
    if let Some(section) = ini.section(Some("elevation")) {
        if let Some(v) = parse_value::<f32>(section, "elevation", "offset")? {
            config.elevation.offset = v;
        }
        if let Some(v) = parse_value::<f32>(section, "elevation", "resolution")? {
            if v <= 0.0 || !v.is_finite() {
                return Err(invalid(
                    "elevation",
                    "resolution",
                    &v.to_string(),
                    "must be a positive number",
                ));
            }
            config.elevation.resolution = v;
        }
    }

    // [fetch] section
    if let Some(section) = ini.section(Some("fetch")) {
        if let Some(v) = section.get("url_template") {
            let v = v.trim();
            if !v.is_empty() {
                config.fetch.url_template = Some(v.to_string());
            }
        }
        if let Some(v) = parse_value::<u64>(section, "fetch", "timeout_secs")? {
            config.fetch.timeout_secs = v;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = v.to_string();
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
        if let Some(v) = section.get("level") {
            let v = v.trim();
            if !v.is_empty() {
                crate::logging::parse_level(v)
                    .map_err(|e| invalid("logging", "level", v, &e.to_string()))?;
                config.logging.level = v.to_string();
            }
        }
        if let Some(v) = section.get("format") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.format = v
                    .parse()
                    .map_err(|_| invalid("logging", "format", v, "expected compact, pretty or full"))?;
            }
        }
    }

    Ok(config)
}

/// Parses `key` if present and non-empty.
fn parse_value<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> Result<Option<T>, ConfigFileError> {
    let Some(raw) = section.get(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| invalid(section_name, key, raw, "expected a number"))
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
