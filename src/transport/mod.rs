//! Transport links
//!
//! The protocol engine never touches a socket. A [`Link`] is a pair of
//! channels: text frames and close requests go out, [`LinkEvent`]s come in,
//! in arrival order. The WebSocket binding lives in [`websocket`].

pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use websocket::WebSocketConnector;

/// Normal closure (RFC 6455 §7.4.1)
pub const NORMAL_CLOSE: u16 = 1000;

/// Something to write to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Something the transport reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    /// `code` is `None` when the peer vanished without a close frame
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

impl LinkEvent {
    /// Anything other than a clean 1000 close
    pub fn is_abnormal_close(&self) -> bool {
        match self {
            LinkEvent::Closed { code, .. } => *code != Some(NORMAL_CLOSE),
            LinkEvent::Error(_) => true,
            LinkEvent::Text(_) => false,
        }
    }
}

pub type FrameSender = mpsc::UnboundedSender<Outbound>;
pub type EventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// An open transport
pub struct Link {
    pub outbound: FrameSender,
    pub inbound: EventReceiver,
}

impl Link {
    /// In-memory link plus the far end of both channels
    pub fn pair() -> (Link, mpsc::UnboundedReceiver<Outbound>, mpsc::UnboundedSender<LinkEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        (Link { outbound, inbound }, outbound_rx, inbound_tx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake refused with HTTP {status}")]
    Refused { status: u16 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Opens outbound links
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link, TransportError>;
}
