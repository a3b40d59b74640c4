//! Error taxonomy shared by every Parley library crate.

use thiserror::Error;

/// Errors surfaced by providers, sessions, relays and stores.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or invalid configuration (no active provider, missing vendor settings).
    #[error("{0}")]
    Configuration(String),

    /// The requested provider is not the active one.
    #[error("Requested provider {requested} does not match active provider {active}")]
    Mismatch { requested: String, active: String },

    /// A vendor or speech backend call failed.
    #[error("{0}")]
    Upstream(String),

    /// A malformed client or backend message.
    #[error("{0}")]
    Protocol(String),

    /// A socket, file or task could not be acquired or used.
    #[error("{0}")]
    Resource(String),

    /// A store lookup found nothing.
    #[error("{0} not found")]
    NotFound(String),
}

impl GatewayError {
    /// Message sent to the client in an `{"error": ...}` frame.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Upstream(msg) => format!("An unexpected error occurred: {msg}"),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Resource(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Protocol(e.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GatewayError>;
