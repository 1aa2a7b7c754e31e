//! Error handling for the central system
//!
//! This module defines the application-wide error type and result alias.
//! Narrow per-concern errors live next to the code that raises them and
//! convert into [`Error`] at the edges.

use thiserror::Error;

use crate::protocol::{ProtocolError, RequestError};
use crate::server::IdentityError;
use crate::transport::TransportError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the central system
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),

    /// Undecodable wire frames
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Refused connection identities
    #[error("Invalid identity: {0}")]
    Identity(#[from] IdentityError),

    /// Outbound request failures
    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    /// Transport link failures
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors
    #[error("Error: {0}")]
    Generic(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Create a new generic error
    pub fn generic(msg: impl Into<String>) -> Self {
        Error::Generic(msg.into())
    }
}

/// Convert from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Generic(err.to_string())
    }
}
