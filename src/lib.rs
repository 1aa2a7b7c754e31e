//! ocpp-central - OCPP central system protocol engine
//!
//! Accepts charge point connections over WebSocket, negotiates identity and
//! protocol version, correlates request/response traffic and dispatches
//! inbound calls to version-specific handlers. The [`client`] module drives
//! the reverse direction with a bounded reconnecting client.

pub mod cli;
pub mod client;
pub mod common;
pub mod ocpp;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

pub use common::{
    config::Config,
    error::{Error, Result},
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
