// Outbound client side
//
// Connects to a charge point, keeps the link alive across abnormal
// closes within a bounded retry budget, and offers a one-shot request
// bridge for synchronous-style callers.

pub mod config;
pub mod connection;

pub use config::{ReconnectConfig, ReconnectState, RetryLimit};
pub use connection::{ClientEvent, ReconnectingClient};
