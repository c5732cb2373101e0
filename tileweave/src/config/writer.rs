//! INI serialization: `ConfigFile` → commented INI string.

use super::settings::ConfigFile;

/// Converts a `ConfigFile` to the commented INI text written to config.ini.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let url_template = config.fetch.url_template.as_deref().unwrap_or("");

    format!(
        r#"[producer]
; Jobs each producer keeps fetching or decoding at once
max_in_flight = {}
; Scheduling tick in milliseconds
tick_interval_ms = {}

[pool]
; Recycled tile records kept for reuse
capacity = {}

[elevation]
; height = offset + (r * 65536 + g * 256 + b) * resolution
offset = {}
resolution = {}

[fetch]
; Remote payload URL; placeholders: {{z}} {{x}} {{y}} {{kind}}
url_template = {}
; Request timeout in seconds
timeout_secs = {}

[logging]
directory = {}
file = {}
; Filter directive, e.g. info or info,tileweave::producer=debug (RUST_LOG wins)
level = {}
; Stdout layout: compact, pretty or full
format = {}
"#,
        config.producer.max_in_flight,
        config.producer.tick_interval_ms,
        config.pool.capacity,
        config.elevation.offset,
        config.elevation.resolution,
        url_template,
        config.fetch.timeout_secs,
        config.logging.directory,
        config.logging.file,
        config.logging.level,
        config.logging.format,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_config_parses_back() {
        let mut config = ConfigFile::default();
        config.producer.max_in_flight = 2;
        config.elevation.offset = -10000.0;
        config.fetch.url_template = Some("http://localhost/{kind}/{z}/{x}/{y}".to_string());
        config.logging.level = "warn,tileweave::producer=debug".to_string();
        config.logging.format = crate::logging::LogFormat::Pretty;

        let text = to_config_string(&config);
        let ini = ini::Ini::load_from_str(&text).unwrap();
        let parsed = super::super::parser::parse_ini(&ini).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_placeholders_are_documented_literally() {
        let text = to_config_string(&ConfigFile::default());
        assert!(text.contains("{z} {x} {y} {kind}"));
        assert!(text.contains("url_template = \n"));
    }
}
