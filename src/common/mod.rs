// Shared functionality used across the whole central system
//
// Shared types, configuration, errors and logging setup

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use types::{ConnectionId, ConnectionState, DeviceKey, Identity, ProtocolVersion, TransportEvent};
