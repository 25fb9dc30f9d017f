//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `dashboard.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - BackendConfig: Where the backend lives and its endpoint paths.
//!     - StreamConfig: Reconnect delay for the live stream.
//!     - DisplayConfig: Time zone for time-of-day and the "no data" grace.
//!     - ServerConfig: Bind address of the local dashboard.
//!     - LoggingConfig: Log level and per-reading logging.
//!
//! the backend hostname is the single external value most deployments
//! change; it can also come from DASHBOARD_SERVER_HOSTNAME or --hostname.
//! everything is read once at startup and handed down explicitly.
//!
//! ==============================================================================

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// environment variable overriding `backend.hostname`
pub const HOSTNAME_ENV: &str = "DASHBOARD_SERVER_HOSTNAME";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DashboardConfig {
    pub backend: BackendConfig,
    pub stream: StreamConfig,
    pub display: DisplayConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    /// host[:port] of the backend, without scheme
    pub hostname: String,
    /// https/wss instead of http/ws
    pub secure: bool,
    pub readings_endpoint: String,
    pub devices_endpoint: String,
    pub stream_endpoint: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub reconnect_delay_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayZone {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub timezone: DisplayZone,
    /// how long an empty, settled screen waits for a live reading before
    /// showing "no data"
    pub no_data_after_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_readings: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1:8000".to_string(),
            secure: false,
            readings_endpoint: "/api/data/".to_string(),
            devices_endpoint: "/api/device/".to_string(),
            stream_endpoint: "/ws/currentData/".to_string(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { reconnect_delay_seconds: 10 }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: DisplayZone::Local,
            no_data_after_seconds: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_readings: true,
        }
    }
}

impl BackendConfig {
    /// full URL of the historical readings endpoint
    pub fn readings_url(&self) -> String {
        format!("{}://{}{}", self.http_scheme(), self.hostname, self.readings_endpoint)
    }

    /// full URL of the device events endpoint
    pub fn devices_url(&self) -> String {
        format!("{}://{}{}", self.http_scheme(), self.hostname, self.devices_endpoint)
    }

    /// full URL of the real-time readings websocket
    pub fn stream_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.hostname, self.stream_endpoint)
    }

    fn http_scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }
}

impl DisplayConfig {
    pub fn no_data_after(&self) -> Duration {
        Duration::from_secs(self.no_data_after_seconds)
    }
}

impl DashboardConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load with default fallback
    ///
    /// runs before the logger exists, so problems go to stderr.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("dashboard.toml"),
            PathBuf::from("..").join("config").join("dashboard.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        eprintln!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        eprintln!("[CONFIG] Warning: {}", e);
                    }
                }
            }
        }

        eprintln!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// apply the hostname override, env first and then the cli flag
    pub fn with_hostname_override(mut self, env: Option<String>, cli: Option<String>) -> Self {
        if let Some(hostname) = cli.or(env).filter(|h| !h.trim().is_empty()) {
            self.backend.hostname = hostname.trim().to_string();
        }
        self
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        log::info!("[CONFIG] Backend: {}", self.backend.hostname);
        log::info!("[CONFIG] Readings: {}", self.backend.readings_url());
        log::info!("[CONFIG] Devices: {}", self.backend.devices_url());
        log::info!("[CONFIG] Stream: {}", self.backend.stream_url());
        log::info!(
            "[CONFIG] Reconnect delay: {}s",
            self.stream.reconnect_delay_seconds
        );
        log::info!("[CONFIG] Dashboard bind: {}", self.server.bind);
    }
}
