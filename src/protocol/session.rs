// Per-link frame routing
//
// Inbound text is handed to the session strictly in arrival order.
// Responses settle the correlator synchronously. Calls are queued to one
// dispatch task per session and handled one at a time in arrival order, so
// a slow handler delays later Calls but never response routing.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::messages::Frame;
use crate::protocol::{CallContext, Correlator, Dispatcher, MessageCodec, RequestError};
use crate::transport::{FrameSender, Outbound};

struct InboundCall {
    id: String,
    action: String,
    payload: Value,
}

pub struct Session {
    ctx: CallContext,
    correlator: Arc<Correlator>,
    calls: mpsc::UnboundedSender<InboundCall>,
    codec: MessageCodec,
}

impl Session {
    pub fn new(
        ctx: CallContext,
        correlator: Arc<Correlator>,
        dispatcher: Arc<Dispatcher>,
        outbound: FrameSender,
        codec: MessageCodec,
    ) -> Self {
        let (calls, queue) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_in_order(ctx.clone(), dispatcher, outbound, codec, queue));
        Self {
            ctx,
            correlator,
            calls,
            codec,
        }
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Route one inbound text frame. Never fails: malformed frames and
    /// stray responses are logged and dropped.
    pub fn handle_text(&self, text: &str) {
        let device = &self.ctx.identity;
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%device, error = %e, "dropping undecodable frame");
                return;
            }
        };

        match frame {
            Frame::Call { id, action, payload } => {
                if self.calls.send(InboundCall { id, action, payload }).is_err() {
                    debug!(%device, "dispatch task gone, dropping Call");
                }
            }
            Frame::CallResult { id, payload } => {
                if let Err(e) = self.correlator.resolve(&id, payload) {
                    debug!(%device, error = %e, "dropping CallResult");
                }
            }
            Frame::CallError {
                id,
                code,
                description,
                details,
            } => {
                let error = RequestError::CallError {
                    code,
                    description,
                    details,
                };
                if let Err(e) = self.correlator.reject(&id, error) {
                    debug!(%device, error = %e, "dropping CallError");
                }
            }
        }
    }
}

/// Answer queued Calls one at a time until the session is dropped
async fn dispatch_in_order(
    ctx: CallContext,
    dispatcher: Arc<Dispatcher>,
    outbound: FrameSender,
    codec: MessageCodec,
    mut queue: mpsc::UnboundedReceiver<InboundCall>,
) {
    while let Some(InboundCall { id, action, payload }) = queue.recv().await {
        let reply = dispatcher.dispatch(&ctx, &id, &action, payload).await;
        if outbound.send(Outbound::Text(codec.encode(&reply))).is_err() {
            debug!(device = %ctx.identity, %id, %action, "link gone before reply was written");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Identity, ProtocolVersion};
    use crate::protocol::{typed, ErrorCode, HandlerError};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn session(dispatcher: Dispatcher) -> (Session, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = Identity::new(None, "CS001", ProtocolVersion::V16);
        let correlator = Arc::new(Correlator::new("CS001", tx.clone(), MessageCodec::default(), Duration::from_secs(60)));
        let session = Session::new(
            CallContext::new(identity),
            correlator,
            Arc::new(dispatcher),
            tx,
            MessageCodec::default(),
        );
        (session, rx)
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Frame {
        match rx.recv().await {
            Some(Outbound::Text(text)) => MessageCodec::default().decode(&text).unwrap(),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inbound_call_is_answered() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            ProtocolVersion::V16,
            "Heartbeat",
            typed(|_ctx: &CallContext, _req: Value| -> Result<Value, HandlerError> { Ok(json!({"currentTime": "now"})) }),
        );
        let (session, mut rx) = session(dispatcher);

        session.handle_text(r#"[2,"hb1","Heartbeat",{}]"#);
        assert_eq!(
            next_frame(&mut rx).await,
            Frame::CallResult { id: "hb1".into(), payload: json!({"currentTime": "now"}) }
        );
    }

    #[tokio::test]
    async fn test_unknown_action_keeps_session_usable() {
        let (session, mut rx) = session(Dispatcher::new());

        session.handle_text(r#"[2,"x1","TotallyUnknownAction",{}]"#);
        assert!(matches!(
            next_frame(&mut rx).await,
            Frame::CallError { code: ErrorCode::NotImplemented, .. }
        ));

        session.handle_text(r#"[2,"x2","AlsoUnknown",{}]"#);
        assert_eq!(next_frame(&mut rx).await.id(), "x2");
    }

    #[tokio::test]
    async fn test_malformed_and_stray_frames_are_dropped() {
        let (session, mut rx) = session(Dispatcher::new());

        session.handle_text("garbage");
        session.handle_text(r#"[9,"a"]"#);
        session.handle_text(r#"[3,"never-sent",{}]"#);
        session.handle_text(r#"[4,"never-sent","GenericError","",{}]"#);

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_response_settles_outbound_call() {
        let (session, mut rx) = session(Dispatcher::new());
        let correlator = Arc::clone(session.correlator());
        let caller = tokio::spawn(async move { correlator.call("Reset", json!({"type": "Hard"})).await });

        let id = next_frame(&mut rx).await.id().to_string();
        session.handle_text(&format!(r#"[4,"{}","NotSupported","no reset here",{{}}]"#, id));

        assert!(matches!(
            caller.await.unwrap(),
            Err(RequestError::CallError { code: ErrorCode::NotSupported, .. })
        ));
    }

    /// Sleeps for the requested time, then records the Call's order
    struct Recording {
        seen: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl crate::protocol::CommandHandler for Recording {
        async fn invoke(&self, _ctx: &CallContext, payload: Value) -> Result<Value, HandlerError> {
            let delay = payload["delayMs"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let tag = payload["tag"].as_str().unwrap_or_default().to_string();
            self.seen.lock().unwrap().push(tag.clone());
            Ok(json!({ "tag": tag }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_dispatched_in_arrival_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(ProtocolVersion::V16, "DataTransfer", Recording { seen: Arc::clone(&seen) });
        let (session, mut rx) = session(dispatcher);

        session.handle_text(r#"[2,"slow","DataTransfer",{"tag":"first","delayMs":500}]"#);
        session.handle_text(r#"[2,"fast","DataTransfer",{"tag":"second","delayMs":0}]"#);

        assert_eq!(next_frame(&mut rx).await.id(), "slow");
        assert_eq!(next_frame(&mut rx).await.id(), "fast");
        assert_eq!(*seen.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }
}
