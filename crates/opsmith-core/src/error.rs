//! Error taxonomy shared by all opsmith crates.

use thiserror::Error;

/// Result type alias for opsmith operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the opsmith cores.
///
/// Variants are grouped by semantic kind rather than by origin so the CLI
/// can map each failure to a single human-readable line and exit code.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid spec string, unknown kind, unsupported platform, bad config.
    #[error("configuration error: {0}")]
    Config(String),

    /// A runtime, tool, route or subdirectory that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport failure or non-2xx response from an upstream service.
    #[error("network error: {message}")]
    Network {
        message: String,
        /// HTTP status, when the failure happened above the transport layer.
        status: Option<u16>,
        /// Response body, when one was received.
        body: Option<String>,
    },

    /// Checksum mismatch, archive corruption, or a path-traversal attempt.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A security scan blocked the operation.
    #[error("security policy violation: {0}")]
    SecurityPolicy(String),

    /// A child process (git, interpreter, package installer) failed.
    #[error("subprocess failed: {0}")]
    Subprocess(String),

    /// Rate limiter used non-cooperatively and out of tokens.
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// A network error without an HTTP status (transport-level failure).
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network {
            message: msg.into(),
            status: None,
            body: None,
        }
    }

    /// A network error carrying the HTTP status and response body.
    pub fn http_status(msg: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Error::Network {
            message: msg.into(),
            status: Some(status),
            body: Some(body.into()),
        }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Error::Integrity(msg.into())
    }

    pub fn security_policy(msg: impl Into<String>) -> Self {
        Error::SecurityPolicy(msg.into())
    }

    pub fn subprocess(msg: impl Into<String>) -> Self {
        Error::Subprocess(msg.into())
    }
}
