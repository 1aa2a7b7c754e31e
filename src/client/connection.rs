// Reconnecting client
//
// Opens a link to a charge point through a Connector, runs the same
// session machinery as the server side over it, and retries abnormal
// closes with a fixed backoff until the retry budget is spent. Every retry
// is driven by one delayed task whose handle is kept so close() and a new
// open() can cancel it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

use crate::client::config::{ReconnectConfig, ReconnectState};
use crate::protocol::{CallContext, Correlator, Dispatcher, Frame, RequestError, Session};
use crate::transport::{Connector, EventReceiver, FrameSender, Link, LinkEvent, Outbound, WebSocketConnector, NORMAL_CLOSE};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications, delivered in the order they happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Opened,
    Closed { code: Option<u16> },
    Reconnecting { attempt: u32, delay: Duration },
    /// Retry budget spent; nothing further happens without a new open()
    MaxRetriesReached { attempts: u32 },
}

struct Active {
    generation: u64,
    outbound: FrameSender,
    correlator: Arc<Correlator>,
}

struct Inner {
    retry: ReconnectState,
    active: Option<Active>,
    generation: u64,
    /// Set by close(); suppresses retries until the next open()
    stopped: bool,
    /// Bumped by every open() and close(). A connect loop or retry timer
    /// started under an older epoch must not attach.
    epoch: u64,
    retry_timer: Option<AbortHandle>,
}

struct Shared {
    config: ReconnectConfig,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<ClientEvent>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancelled(&self, epoch: u64) -> bool {
        let inner = self.lock();
        inner.stopped || inner.epoch != epoch
    }

    fn emit(&self, event: ClientEvent) {
        debug!(device = %self.config.device_id, ?event, "client event");
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

#[derive(Clone)]
pub struct ReconnectingClient {
    shared: Arc<Shared>,
}

impl ReconnectingClient {
    pub fn new(config: ReconnectConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_dispatcher(config, connector, Dispatcher::new())
    }

    /// Calls arriving from the peer are answered through `dispatcher`
    pub fn with_dispatcher(config: ReconnectConfig, connector: Arc<dyn Connector>, dispatcher: Dispatcher) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let retry = ReconnectState::new(config.max_retries, config.backoff);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                dispatcher: Arc::new(dispatcher),
                events,
                inner: Mutex::new(Inner {
                    retry,
                    active: None,
                    generation: 0,
                    stopped: false,
                    epoch: 0,
                    retry_timer: None,
                }),
            }),
        }
    }

    /// Client over `ws://` using the configured URL and subprotocol
    pub fn websocket(config: ReconnectConfig) -> Self {
        let connector = WebSocketConnector::new(config.url.clone(), config.version);
        Self::new(config, Arc::new(connector))
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn retry_state(&self) -> ReconnectState {
        self.shared.lock().retry.clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    /// Open the link, retrying failed attempts with the fixed backoff.
    /// An explicit open always starts with a fresh retry budget.
    #[instrument(skip(self), fields(device = %self.shared.config.device_id))]
    pub async fn open(&self) -> Result<(), RequestError> {
        let epoch = {
            let mut inner = self.shared.lock();
            if inner.active.is_some() {
                return Ok(());
            }
            inner.stopped = false;
            inner.epoch += 1;
            if let Some(timer) = inner.retry_timer.take() {
                timer.abort();
            }
            inner.retry.reset();
            inner.epoch
        };

        loop {
            if self.shared.cancelled(epoch) {
                debug!("open cancelled by close()");
                return Err(RequestError::ConnectionClosed);
            }
            match self.shared.connector.connect().await {
                Ok(link) => {
                    return if attach(&self.shared, link, epoch) {
                        Ok(())
                    } else {
                        Err(RequestError::ConnectionClosed)
                    };
                }
                Err(e) => {
                    if self.shared.cancelled(epoch) {
                        debug!(error = %e, "open cancelled by close()");
                        return Err(RequestError::ConnectionClosed);
                    }
                    let decision = {
                        let mut inner = self.shared.lock();
                        warn!(error = %e, attempt = inner.retry.retry_count() + 1, "open failed");
                        match inner.retry.next_retry() {
                            Some(attempt) => RetryDecision::Retry {
                                attempt,
                                delay: inner.retry.backoff(),
                            },
                            None => RetryDecision::GiveUp {
                                attempts: inner.retry.retry_count() + 1,
                            },
                        }
                    };
                    match decision {
                        RetryDecision::Retry { attempt, delay } => {
                            self.shared.emit(ClientEvent::Reconnecting { attempt, delay });
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp { attempts } => {
                            warn!(attempts, "maximum retries reached");
                            self.shared.emit(ClientEvent::MaxRetriesReached { attempts });
                            return Err(RequestError::Unreachable { attempts });
                        }
                    }
                }
            }
        }
    }

    /// Write a frame if the link is open
    pub fn send(&self, frame: &Frame) -> Result<(), RequestError> {
        let inner = self.shared.lock();
        let active = inner.active.as_ref().ok_or(RequestError::NotOpen)?;
        active
            .outbound
            .send(Outbound::Text(self.shared.config.codec.encode(frame)))
            .map_err(|_| RequestError::NotOpen)
    }

    /// Issue a Call and wait for its outcome
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, RequestError> {
        let correlator = {
            let inner = self.shared.lock();
            let active = inner.active.as_ref().ok_or(RequestError::NotOpen)?;
            Arc::clone(&active.correlator)
        };
        correlator.call(action, payload).await
    }

    /// open, one Call, close
    pub async fn request(&self, action: &str, payload: Value) -> Result<Value, RequestError> {
        self.open().await?;
        let outcome = self.call(action, payload).await;
        self.close();
        outcome
    }

    /// Close the link and cancel any scheduled retry
    pub fn close(&self) {
        let active = {
            let mut inner = self.shared.lock();
            inner.stopped = true;
            inner.epoch += 1;
            if let Some(timer) = inner.retry_timer.take() {
                timer.abort();
            }
            inner.active.take()
        };
        if let Some(active) = active {
            let _ = active.outbound.send(Outbound::Close {
                code: NORMAL_CLOSE,
                reason: String::new(),
            });
            active.correlator.close_all();
            info!(device = %self.shared.config.device_id, "client closed");
            self.shared.emit(ClientEvent::Closed {
                code: Some(NORMAL_CLOSE),
            });
        }
    }
}

/// Install a freshly opened link. Returns false, after closing the link,
/// when `epoch` was cancelled while the connect was in flight.
fn attach(shared: &Arc<Shared>, link: Link, epoch: u64) -> bool {
    let Link { outbound, inbound } = link;
    let config = &shared.config;
    let correlator = Arc::new(Correlator::new(
        config.device_id.clone(),
        outbound.clone(),
        config.codec,
        config.call_timeout,
    ));

    let generation = {
        let mut inner = shared.lock();
        let cancelled = inner.stopped || inner.epoch != epoch;
        if cancelled || inner.active.is_some() {
            drop(inner);
            debug!(device = %config.device_id, cancelled, "discarding opened link");
            let _ = outbound.send(Outbound::Close {
                code: NORMAL_CLOSE,
                reason: String::new(),
            });
            return !cancelled;
        }
        inner.generation += 1;
        inner.retry.reset();
        inner.retry_timer = None;
        inner.active = Some(Active {
            generation: inner.generation,
            outbound: outbound.clone(),
            correlator: Arc::clone(&correlator),
        });
        inner.generation
    };
    info!(device = %config.device_id, url = %config.url, "client link open");
    shared.emit(ClientEvent::Opened);

    let session = Session::new(
        CallContext::new(config.identity()),
        correlator,
        Arc::clone(&shared.dispatcher),
        outbound,
        config.codec,
    );
    tokio::spawn(supervise(Arc::clone(shared), inbound, session, generation));
    true
}

async fn supervise(shared: Arc<Shared>, mut inbound: EventReceiver, session: Session, generation: u64) {
    let ended = loop {
        match inbound.recv().await {
            Some(LinkEvent::Text(text)) => session.handle_text(&text),
            Some(event) => break event,
            None => {
                break LinkEvent::Closed {
                    code: None,
                    reason: String::new(),
                }
            }
        }
    };

    let (active, retry) = {
        let mut inner = shared.lock();
        if !matches!(&inner.active, Some(active) if active.generation == generation) {
            // closed locally or superseded
            return;
        }
        let retry = !inner.stopped && ended.is_abnormal_close();
        (inner.active.take(), retry)
    };

    let code = match &ended {
        LinkEvent::Closed { code, .. } => *code,
        _ => None,
    };
    info!(device = %shared.config.device_id, ?code, "client link closed");
    if let Some(active) = active {
        active.correlator.close_all();
    }
    shared.emit(ClientEvent::Closed { code });

    if retry {
        schedule_retry(&shared);
    }
}

fn schedule_retry(shared: &Arc<Shared>) {
    let mut inner = shared.lock();
    if inner.stopped {
        return;
    }
    match inner.retry.next_retry() {
        Some(attempt) => {
            let delay = inner.retry.backoff();
            let epoch = inner.epoch;
            let task_shared = Arc::clone(shared);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                retry_once(task_shared, epoch).await;
            })
            .abort_handle();
            // the previous timer, if any, is the task calling us
            inner.retry_timer = Some(timer);
            drop(inner);
            shared.emit(ClientEvent::Reconnecting { attempt, delay });
        }
        None => {
            let attempts = inner.retry.retry_count();
            drop(inner);
            warn!(device = %shared.config.device_id, attempts, "maximum retries reached");
            shared.emit(ClientEvent::MaxRetriesReached { attempts });
        }
    }
}

async fn retry_once(shared: Arc<Shared>, epoch: u64) {
    if shared.cancelled(epoch) {
        return;
    }
    match shared.connector.connect().await {
        Ok(link) => {
            attach(&shared, link, epoch);
        }
        Err(e) => {
            warn!(device = %shared.config.device_id, error = %e, "reconnect failed");
            if !shared.cancelled(epoch) {
                schedule_retry(&shared);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::config::RetryLimit;
    use crate::common::types::ProtocolVersion;
    use crate::protocol::{ErrorCode, MessageCodec};
    use crate::transport::{MockConnector, TransportError};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    struct Peer {
        outbound: mpsc::UnboundedReceiver<Outbound>,
        inbound: mpsc::UnboundedSender<LinkEvent>,
    }

    /// Scripted connector: `true` opens an in-memory link, `false` fails.
    /// Once the script runs out every attempt fails.
    struct FakeConnector {
        script: std::sync::Mutex<VecDeque<bool>>,
        attempts: AtomicU32,
        peers: mpsc::UnboundedSender<Peer>,
    }

    impl FakeConnector {
        fn new(script: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
            let (peers, peer_rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                script: std::sync::Mutex::new(script.iter().copied().collect()),
                attempts: AtomicU32::new(0),
                peers,
            });
            (connector, peer_rx)
        }

        fn push(&self, outcomes: &[bool]) {
            self.script.lock().unwrap().extend(outcomes.iter().copied());
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self) -> Result<Link, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let succeed = self.script.lock().unwrap().pop_front().unwrap_or(false);
            if !succeed {
                return Err(TransportError::Connect("connection refused".into()));
            }
            let (link, outbound, inbound) = Link::pair();
            let _ = self.peers.send(Peer { outbound, inbound });
            Ok(link)
        }
    }

    fn config(max_retries: RetryLimit) -> ReconnectConfig {
        ReconnectConfig::new("ws://127.0.0.1:9/ocpp/CS001", ProtocolVersion::V16)
            .with_max_retries(max_retries)
            .with_backoff(Duration::from_millis(1000))
    }

    fn drain(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_exhaust_two_retries() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(3)
            .returning(|| Err(TransportError::Connect("connection refused".into())));

        let client = ReconnectingClient::new(config(RetryLimit::Limited(2)), Arc::new(connector));
        let mut events = client.subscribe();

        let started = tokio::time::Instant::now();
        assert_eq!(client.open().await, Err(RequestError::Unreachable { attempts: 3 }));
        assert!(started.elapsed() >= Duration::from_millis(2000));

        let delay = Duration::from_millis(1000);
        assert_eq!(
            drain(&mut events),
            vec![
                ClientEvent::Reconnecting { attempt: 1, delay },
                ClientEvent::Reconnecting { attempt: 2, delay },
                ClientEvent::MaxRetriesReached { attempts: 3 },
            ]
        );
        assert_eq!(client.retry_state().retry_count(), 2);
        assert!(!client.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_retries_keep_going() {
        let mut script = vec![false; 25];
        script.push(true);
        let (connector, _peers) = FakeConnector::new(&script);
        let client = ReconnectingClient::new(config(RetryLimit::Unlimited), connector.clone());

        client.open().await.unwrap();
        assert_eq!(connector.attempts(), 26);
        assert!(client.is_open());
        assert_eq!(client.retry_state().retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_open_retry_loop() {
        let (connector, _peers) = FakeConnector::new(&[]);
        let client = ReconnectingClient::new(config(RetryLimit::Unlimited), connector.clone());

        let opener = {
            let client = client.clone();
            tokio::spawn(async move { client.open().await })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let before = connector.attempts();
        assert_eq!(before, 3);

        client.close();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts(), before);
        assert!(opener.is_finished());
        assert_eq!(opener.await.unwrap(), Err(RequestError::ConnectionClosed));
        assert!(!client.is_open());
    }

    /// Connects only once released, so close() can land mid-connect
    struct GatedConnector {
        gate: tokio::sync::Notify,
        peers: mpsc::UnboundedSender<Peer>,
    }

    #[async_trait::async_trait]
    impl Connector for GatedConnector {
        async fn connect(&self) -> Result<Link, TransportError> {
            self.gate.notified().await;
            let (link, outbound, inbound) = Link::pair();
            let _ = self.peers.send(Peer { outbound, inbound });
            Ok(link)
        }
    }

    #[tokio::test]
    async fn test_link_opened_after_close_is_discarded() {
        let (peers, mut peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(GatedConnector {
            gate: tokio::sync::Notify::new(),
            peers,
        });
        let client = ReconnectingClient::new(config(RetryLimit::Limited(2)), connector.clone());
        let mut events = client.subscribe();

        let opener = {
            let client = client.clone();
            tokio::spawn(async move { client.open().await })
        };
        tokio::task::yield_now().await;
        client.close();
        connector.gate.notify_one();

        assert_eq!(opener.await.unwrap(), Err(RequestError::ConnectionClosed));
        let mut peer = peer_rx.recv().await.unwrap();
        assert_eq!(
            peer.outbound.recv().await,
            Some(Outbound::Close { code: NORMAL_CLOSE, reason: String::new() })
        );
        assert!(!client.is_open());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_reconnects_after_backoff() {
        let (connector, mut peers) = FakeConnector::new(&[true, true]);
        let client = ReconnectingClient::new(config(RetryLimit::Limited(2)), connector.clone());
        let mut events = client.subscribe();

        client.open().await.unwrap();
        let first = peers.recv().await.unwrap();
        first
            .inbound
            .send(LinkEvent::Closed { code: Some(1006), reason: String::new() })
            .unwrap();

        let second = peers.recv().await.unwrap();
        assert!(!second.inbound.is_closed());
        assert_eq!(connector.attempts(), 2);

        assert_eq!(events.recv().await.unwrap(), ClientEvent::Opened);
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Closed { code: Some(1006) });
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::Reconnecting { attempt: 1, delay: Duration::from_millis(1000) }
        );
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Opened);
        assert_eq!(client.retry_state().retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_count_restarts_after_successful_open() {
        // one failed attempt, then open
        let (connector, mut peers) = FakeConnector::new(&[false, true]);
        let client = ReconnectingClient::new(config(RetryLimit::Limited(2)), connector.clone());
        client.open().await.unwrap();
        assert_eq!(client.retry_state().retry_count(), 0);

        let mut events = client.subscribe();
        let peer = peers.recv().await.unwrap();
        connector.push(&[false, false]);
        peer.inbound.send(LinkEvent::Error("reset by peer".into())).unwrap();

        let delay = Duration::from_millis(1000);
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Closed { code: None });
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Reconnecting { attempt: 1, delay });
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Reconnecting { attempt: 2, delay });
        assert_eq!(events.recv().await.unwrap(), ClientEvent::MaxRetriesReached { attempts: 2 });
        assert_eq!(connector.attempts(), 4);

        // no further attempts on its own
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_close_does_not_retry() {
        let (connector, mut peers) = FakeConnector::new(&[true]);
        let client = ReconnectingClient::new(config(RetryLimit::Unlimited), connector.clone());
        let mut events = client.subscribe();
        client.open().await.unwrap();

        let peer = peers.recv().await.unwrap();
        peer.inbound
            .send(LinkEvent::Closed { code: Some(NORMAL_CLOSE), reason: String::new() })
            .unwrap();

        assert_eq!(events.recv().await.unwrap(), ClientEvent::Opened);
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Closed { code: Some(NORMAL_CLOSE) });
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_send_requires_open_link() {
        let (connector, _peers) = FakeConnector::new(&[]);
        let client = ReconnectingClient::new(config(RetryLimit::Limited(0)), connector);

        let frame = Frame::Call {
            id: "1".into(),
            action: "Heartbeat".into(),
            payload: json!({}),
        };
        assert_eq!(client.send(&frame), Err(RequestError::NotOpen));
        assert_eq!(client.call("Heartbeat", json!({})).await, Err(RequestError::NotOpen));
    }

    #[tokio::test]
    async fn test_request_bridge_round_trip() {
        let (connector, mut peers) = FakeConnector::new(&[true]);
        let client = ReconnectingClient::new(config(RetryLimit::Limited(2)), connector);

        let bridge = {
            let client = client.clone();
            tokio::spawn(async move { client.request("Reset", json!({"type": "Hard"})).await })
        };

        let mut peer = peers.recv().await.unwrap();
        let codec = MessageCodec::default();
        let id = match peer.outbound.recv().await {
            Some(Outbound::Text(text)) => match codec.decode(&text).unwrap() {
                Frame::Call { id, action, .. } => {
                    assert_eq!(action, "Reset");
                    id
                }
                other => panic!("expected Call, got {:?}", other),
            },
            other => panic!("expected text, got {:?}", other),
        };
        peer.inbound
            .send(LinkEvent::Text(codec.encode_result(&id, &json!({"status": "Accepted"}))))
            .unwrap();

        assert_eq!(bridge.await.unwrap().unwrap(), json!({"status": "Accepted"}));
        assert_eq!(
            peer.outbound.recv().await,
            Some(Outbound::Close { code: NORMAL_CLOSE, reason: String::new() })
        );
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_peer_calls_are_dispatched() {
        let (connector, mut peers) = FakeConnector::new(&[true]);
        let client = ReconnectingClient::new(config(RetryLimit::Limited(0)), connector);
        client.open().await.unwrap();

        let mut peer = peers.recv().await.unwrap();
        peer.inbound
            .send(LinkEvent::Text(r#"[2,"p1","UnlockConnector",{"connectorId":1}]"#.into()))
            .unwrap();
        match peer.outbound.recv().await {
            Some(Outbound::Text(text)) => assert!(matches!(
                MessageCodec::default().decode(&text).unwrap(),
                Frame::CallError { code: ErrorCode::NotImplemented, .. }
            )),
            other => panic!("expected CallError, got {:?}", other),
        }
        client.close();
    }
}
