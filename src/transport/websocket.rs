// WebSocket binding of the link abstraction
//
// Two pump tasks per socket: one drains the outbound channel into the
// sink, one forwards stream items as LinkEvents in arrival order.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, instrument, warn};

use crate::common::types::ProtocolVersion;
use crate::transport::{Connector, Link, LinkEvent, Outbound, TransportError};

const CLOSE_DRAIN: Duration = Duration::from_secs(5);

/// Wrap an established WebSocket in a [`Link`]
pub fn spawn_link<S>(socket: WebSocketStream<S>, label: impl Into<String>) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let label = label.into();
    let (sink, stream) = socket.split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (give_up, give_up_rx) = oneshot::channel();

    tokio::spawn(pump_outbound(sink, outbound_rx, give_up, label.clone()));
    tokio::spawn(pump_inbound(stream, inbound_tx, give_up_rx, label));

    Link { outbound, inbound }
}

async fn pump_outbound<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut give_up: oneshot::Sender<()>,
    label: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut close_sent = false;
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(peer = %label, error = %e, "write failed, stopping writer");
                    return;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: Cow::Owned(reason),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(peer = %label, error = %e, "close frame not delivered");
                }
                close_sent = true;
                break;
            }
        }
    }
    let _ = tokio::time::timeout(CLOSE_DRAIN, sink.close()).await;

    if close_sent {
        // the reader drops its receiver once the peer answers or goes away
        let timed_out = tokio::select! {
            _ = tokio::time::sleep(CLOSE_DRAIN) => true,
            _ = give_up.closed() => false,
        };
        if timed_out {
            info!(peer = %label, timeout = ?CLOSE_DRAIN, "close handshake unanswered, dropping socket");
            let _ = give_up.send(());
        }
    }
}

async fn pump_inbound<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    inbound: mpsc::UnboundedSender<LinkEvent>,
    mut give_up: oneshot::Receiver<()>,
    label: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // cleared once the writer is gone without giving up
    let mut armed = true;
    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            signal = &mut give_up, if armed => match signal {
                Ok(()) => {
                    let _ = inbound.send(LinkEvent::Closed {
                        code: None,
                        reason: "close handshake timed out".to_string(),
                    });
                    return;
                }
                Err(_) => {
                    armed = false;
                    continue;
                }
            },
        };
        let Some(item) = item else { break };
        let event = match item {
            Ok(Message::Text(text)) => LinkEvent::Text(text),
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                    None => (None, String::new()),
                };
                let _ = inbound.send(LinkEvent::Closed { code, reason });
                // keep polling so the queued close reply is flushed
                let _ = tokio::time::timeout(CLOSE_DRAIN, async { while stream.next().await.is_some() {} }).await;
                return;
            }
            Ok(Message::Binary(data)) => {
                warn!(peer = %label, len = data.len(), "ignoring binary frame");
                continue;
            }
            // tungstenite answers pings itself
            Ok(_) => continue,
            Err(e) => {
                let _ = inbound.send(LinkEvent::Error(e.to_string()));
                return;
            }
        };
        if inbound.send(event).is_err() {
            return;
        }
    }
    let _ = inbound.send(LinkEvent::Closed {
        code: None,
        reason: String::new(),
    });
}

/// Opens `ws://` links to a charge point, offering one subprotocol
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    version: ProtocolVersion,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            url: url.into(),
            version,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> Result<Link, TransportError> {
        let token = self.version.subprotocol().ok_or_else(|| {
            TransportError::InvalidRequest(format!("OCPP {} has no WebSocket subprotocol", self.version))
        })?;

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(token));

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| TransportError::Connect(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(connect_error)?;

        info!(subprotocol = token, "link open");
        Ok(spawn_link(socket, self.url.clone()))
    }
}

fn connect_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) => TransportError::Refused {
            status: response.status().as_u16(),
        },
        other => TransportError::Connect(other.to_string()),
    }
}
