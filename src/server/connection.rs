// Connection lifecycle
//
// A Connection owns the inbound side of one link and is driven by a single
// task, so frames from one device are handled in the order they arrived.
// The ConnectionHandle is the shared half: registry entries and admin code
// use it to issue calls, observe state and request a close.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::common::types::{ConnectionId, ConnectionState, Identity, TransportEvent};
use crate::protocol::{CallContext, Correlator, Dispatcher, MessageCodec, RequestError, Session};
use crate::registry::ConnectionRegistry;
use crate::transport::{EventReceiver, FrameSender, Link, LinkEvent, Outbound, NORMAL_CLOSE};

pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    correlator: Arc<Correlator>,
    state: watch::Sender<ConnectionState>,
    outbound: FrameSender,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    /// New handle in the `Connecting` state
    pub fn new(identity: Identity, outbound: FrameSender, codec: MessageCodec, call_timeout: Duration) -> Self {
        let correlator = Correlator::new(identity.to_string(), outbound.clone(), codec, call_timeout);
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id: ConnectionId::new(),
            identity,
            correlator: Arc::new(correlator),
            state,
            outbound,
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Apply a transport event and return the resulting state
    pub(crate) fn transition(&self, event: TransportEvent) -> ConnectionState {
        self.state.send_if_modified(|state| {
            let next = state.on_event(event);
            let changed = next != *state;
            if changed {
                debug!(device = %self.identity, from = %state, to = %next, "state change");
                *state = next;
            }
            changed
        });
        self.state()
    }

    /// Issue a Call to the device with the default timeout
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, RequestError> {
        self.call_with_timeout(action, payload, self.correlator.default_timeout()).await
    }

    pub async fn call_with_timeout(&self, action: &str, payload: Value, timeout: Duration) -> Result<Value, RequestError> {
        match self.state() {
            ConnectionState::Open => self.correlator.send(action, payload, timeout).await,
            ConnectionState::Connecting => Err(RequestError::NotOpen),
            ConnectionState::Closing | ConnectionState::Closed => Err(RequestError::ConnectionClosed),
        }
    }

    /// Start a local shutdown. The connection reaches `Closed` once the
    /// transport confirms.
    pub fn close(&self, reason: &str) {
        let before = self.state();
        if self.transition(TransportEvent::CloseRequested) == ConnectionState::Closing && before != ConnectionState::Closing {
            info!(device = %self.identity, %reason, "closing connection");
            let _ = self.outbound.send(Outbound::Close {
                code: NORMAL_CLOSE,
                reason: reason.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

/// Inbound half of an accepted connection
pub struct Connection {
    handle: Arc<ConnectionHandle>,
    session: Session,
    inbound: EventReceiver,
    registry: Arc<ConnectionRegistry>,
}

impl Connection {
    pub fn new(
        identity: Identity,
        link: Link,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<ConnectionRegistry>,
        codec: MessageCodec,
        call_timeout: Duration,
    ) -> Self {
        let Link { outbound, inbound } = link;
        let handle = Arc::new(ConnectionHandle::new(identity.clone(), outbound.clone(), codec, call_timeout));
        let session = Session::new(
            CallContext::new(identity),
            Arc::clone(handle.correlator()),
            dispatcher,
            outbound,
            codec,
        );
        Self {
            handle,
            session,
            inbound,
            registry,
        }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// The transport reported open
    pub fn opened(&self) -> ConnectionState {
        self.handle.transition(TransportEvent::Opened)
    }

    /// Read frames until the transport goes away, then tear down
    #[instrument(skip(self), fields(device = %self.handle.identity, connection = %self.handle.id))]
    pub async fn run(mut self) -> ConnectionState {
        while let Some(event) = self.inbound.recv().await {
            match event {
                LinkEvent::Text(text) => self.session.handle_text(&text),
                LinkEvent::Closed { code, reason } => {
                    info!(?code, %reason, "transport closed");
                    return self.finish(TransportEvent::Closed);
                }
                LinkEvent::Error(error) => {
                    warn!(%error, "transport error");
                    return self.finish(TransportEvent::Errored);
                }
            }
        }
        self.finish(TransportEvent::Closed)
    }

    fn finish(&self, event: TransportEvent) -> ConnectionState {
        let state = self.handle.transition(event);
        self.registry.unregister(&self.handle);
        let rejected = self.handle.correlator.close_all();
        if rejected > 0 {
            info!(rejected, "pending calls rejected");
        }
        state
    }
}
