//! Settings structures.

use serde::{Deserialize, Serialize};
use sluice_core::logging::LogFormat;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SluiceSettings {
    /// Network and session settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Network and session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Session protocol TCP port.
    pub port: u16,
    /// Health and metrics HTTP port.
    pub http_port: u16,
    /// Whether to serve the HTTP endpoints at all.
    pub http_enabled: bool,
    /// Maximum concurrent consumer connections.
    pub max_connections: usize,
    /// Maximum frame size in bytes.
    pub max_frame_length: usize,
    /// Fetch size used when a GET asks for zero or fewer records.
    pub default_fetch_size: usize,
    /// Seconds to wait for connections to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 11111,
            http_port: 11112,
            http_enabled: true,
            max_connections: 256,
            max_frame_length: 16 * 1024 * 1024,
            default_fetch_size: 1000,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_serialization() {
        let json = serde_json::to_value(SluiceSettings::default()).unwrap();
        assert!(json["server"]["maxConnections"].is_number());
        assert!(json["server"]["defaultFetchSize"].is_number());
        assert_eq!(json["logging"]["format"], "compact");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: SluiceSettings =
            serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.http_port, 11112);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn json_log_format() {
        let settings: SluiceSettings =
            serde_json::from_str(r#"{"logging":{"format":"json"}}"#).unwrap();
        assert_eq!(settings.logging.format, LogFormat::Json);
    }
}
