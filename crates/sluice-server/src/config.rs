//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_settings::ServerSettings;

/// Configuration for the sluice server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Session protocol port (default `0` for auto-assign).
    pub port: u16,
    /// HTTP port for health and metrics (default `0` for auto-assign).
    pub http_port: u16,
    /// Whether the HTTP listener runs.
    pub http_enabled: bool,
    /// Maximum concurrent consumer connections.
    pub max_connections: usize,
    /// Largest accepted frame in bytes.
    pub max_frame_length: usize,
    /// Records per GET when the request asks for zero or fewer.
    pub default_fetch_size: usize,
    /// Seconds to wait for connections to close on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Shutdown drain timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            http_port: 0,
            http_enabled: true,
            max_connections: 256,
            max_frame_length: sluice_protocol::frame::DEFAULT_MAX_FRAME_LENGTH,
            default_fetch_size: 1000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            http_port: settings.http_port,
            http_enabled: settings.http_enabled,
            max_connections: settings.max_connections,
            max_frame_length: settings.max_frame_length,
            default_fetch_size: settings.default_fetch_size,
            shutdown_timeout_secs: settings.shutdown_timeout_secs,
        }
    }
}
