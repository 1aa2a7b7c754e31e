//! Core OCPP handler sets
//!
//! The actions every charge point sends regardless of deployment, installed
//! into the dispatcher at startup. 1.5 devices reach the 1.6 set through
//! the legacy envelope bridge.

pub mod v16;
pub mod v201;

use crate::common::types::ProtocolVersion;
use crate::protocol::Dispatcher;

/// Install the core handlers for every known protocol version.
/// `heartbeat_interval` is the interval, in seconds, handed out in
/// BootNotification responses.
pub fn register_core_handlers(dispatcher: &mut Dispatcher, heartbeat_interval: u32) {
    v16::register(dispatcher, ProtocolVersion::V16, heartbeat_interval);
    v16::register(dispatcher, ProtocolVersion::V15, heartbeat_interval);
    v201::register(dispatcher, heartbeat_interval);
}
