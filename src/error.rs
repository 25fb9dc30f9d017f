//! ==============================================================================
//! error.rs - typed errors for the dashboard core
//! ==============================================================================
//!
//! purpose:
//!     one enum per failure domain. none of these ever terminate the screen:
//!     fetch errors fall back to an empty batch, stream errors feed the
//!     reconnect state machine, config errors fall back to defaults.
//!
//! ==============================================================================

use thiserror::Error;

/// a failed one-shot batch retrieval
#[derive(Debug, Error)]
pub enum FetchError {
    /// the request never produced a response (dns, refused, timeout)
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// the backend answered with a non-2xx status
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// the body was not json, or not the expected shape
    #[error("malformed body from {url}: {reason}")]
    Body { url: String, reason: String },
}

/// a failed attempt to open the streaming connection
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    /// connector-specific refusal without an underlying io error
    #[error("stream endpoint {0} unavailable")]
    Unavailable(String),
}

/// a configuration file that could not be used
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
