//! Error types for the tollgate-proxy crate.

use thiserror::Error;

/// Errors that can occur in the network layer.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("no leaf certificate available for {host}: {reason}")]
    Certificate { host: String, reason: String },

    #[error("HTTP parse error: {0}")]
    HttpParse(String),

    #[error("upstream connection failed to {host}: {reason}")]
    UpstreamConnect { host: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
