//! Common types used throughout the application

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol generation spoken on one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// OCPP 1.5, only reachable through the legacy envelope transport
    V15,
    /// OCPP 1.6J
    V16,
    /// OCPP 2.0.1
    V201,
}

impl ProtocolVersion {
    /// Every version the engine knows about
    pub const ALL: [ProtocolVersion; 3] = [Self::V15, Self::V16, Self::V201];

    /// WebSocket subprotocol token, `None` for envelope-only generations
    pub fn subprotocol(self) -> Option<&'static str> {
        match self {
            Self::V15 => None,
            Self::V16 => Some("ocpp1.6"),
            Self::V201 => Some("ocpp2.0.1"),
        }
    }

    /// Resolve an exact subprotocol token
    pub fn from_subprotocol(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|version| version.subprotocol() == Some(token))
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V15 => write!(f, "1.5"),
            Self::V16 => write!(f, "1.6"),
            Self::V201 => write!(f, "2.0.1"),
        }
    }
}

/// Who a connection belongs to, parsed once from the connection path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub tenant_id: Option<String>,
    pub device_id: String,
    pub version: ProtocolVersion,
}

impl Identity {
    pub fn new(tenant_id: Option<String>, device_id: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            tenant_id,
            device_id: device_id.into(),
            version,
        }
    }

    /// Registry key; the protocol version is not part of it
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            tenant_id: self.tenant_id.clone(),
            device_id: self.device_id.clone(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tenant_id {
            Some(tenant) => write!(f, "{}/{}", tenant, self.device_id),
            None => write!(f, "{}", self.device_id),
        }
    }
}

/// `(tenant, device)` pair a live connection is registered under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub tenant_id: Option<String>,
    pub device_id: String,
}

impl DeviceKey {
    pub fn new(tenant_id: Option<&str>, device_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.map(str::to_owned),
            device_id: device_id.to_owned(),
        }
    }
}

/// Connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events reported by the transport underneath a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// The local side asked for shutdown
    CloseRequested,
    Closed,
    Errored,
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Local shutdown initiated, waiting for the transport to confirm
    Closing,
    Closed,
}

impl ConnectionState {
    /// Next state after a transport event. Events that make no sense in the
    /// current state leave it untouched; `Closed` is terminal.
    pub fn on_event(self, event: TransportEvent) -> Self {
        match (self, event) {
            (Self::Closed, _) => Self::Closed,
            (_, TransportEvent::Closed | TransportEvent::Errored) => Self::Closed,
            (Self::Connecting, TransportEvent::Opened) => Self::Open,
            (Self::Connecting | Self::Open, TransportEvent::CloseRequested) => Self::Closing,
            (state, _) => state,
        }
    }

    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}
