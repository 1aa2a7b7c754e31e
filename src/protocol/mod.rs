//! OCPP-J protocol engine
//!
//! Everything that happens on an established link, independent of the
//! transport underneath it:
//! - frame encoding and decoding
//! - request/response correlation with timeouts
//! - dispatch of inbound calls to version-specific command handlers
//! - the legacy envelope bridge onto the same handler table

pub mod codec;
pub mod correlator;
pub mod handler;
pub mod legacy;
pub mod messages;
pub mod session;

use std::time::Duration;

use serde_json::Value;

pub use codec::MessageCodec;
pub use correlator::Correlator;
pub use handler::{typed, CallContext, CommandHandler, DispatchError, Dispatcher, HandlerError};
pub use legacy::{LegacyBridge, LegacyFault};
pub use messages::{ErrorCode, Frame, MessageType};
pub use session::Session;

/// Malformed or undecodable inbound frame. Never fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("unknown message type {0}")]
    UnknownMessageType(String),

    #[error("missing {name} at position {position}")]
    MissingField { position: usize, name: &'static str },

    #[error("{name} at position {position} has the wrong type")]
    InvalidField { position: usize, name: &'static str },

    #[error("frame too large: {size} > {max_size}")]
    FrameTooLarge { size: usize, max_size: usize },
}

/// A CallResult/CallError whose id matches nothing pending
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("no pending request with id {0}")]
    UnknownCorrelationId(String),
}

/// What the caller of an outbound Call can observe instead of a result
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("no response to {action} within {timeout:?}")]
    Timeout { action: String, timeout: Duration },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("peer answered {code}: {description}")]
    CallError {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("transport is not open")]
    NotOpen,

    #[error("device unreachable after {attempts} open attempts")]
    Unreachable { attempts: u32 },
}

/// Protocol result alias
pub type ProtocolResult<T> = Result<T, ProtocolError>;
