//! Error types for tunnelctl

use thiserror::Error;

/// Stable error tags, surfaced over HTTP and in logs.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown VPN protocol: {0}")]
    UnknownVpnProtocol(String),

    #[error("no servers match the selection")]
    NoServers,

    #[error("invalid transition: {from}→{to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("too many requests sent for this month")]
    TooManyRequests,

    #[error("bad HTTP status: {0}")]
    BadHttpStatus(u16),

    #[error("tunnel process crashed: {0}")]
    TunnelCrashed(String),

    /// Context cancellation. Never surfaced to external callers as an
    /// error — handlers map it to an empty outcome instead.
    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<serde_json::Error> for TunnelError {
    fn from(error: serde_json::Error) -> Self {
        TunnelError::ParseError(error.to_string())
    }
}

pub type TunnelResult<T> = Result<T, TunnelError>;
