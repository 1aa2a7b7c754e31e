// Request/response correlation
//
// One correlator per link. Each outbound Call gets a fresh id, a pending
// entry holding the caller's continuation, and exactly one timer. Whoever
// removes the pending entry first (response, timer, or close) settles the
// caller; the other paths find nothing and do nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::protocol::{CorrelationError, MessageCodec, RequestError};
use crate::transport::{FrameSender, Outbound};

type Reply = oneshot::Sender<Result<Value, RequestError>>;

struct PendingRequest {
    action: String,
    created_at: Instant,
    timer: AbortHandle,
    reply: Reply,
}

impl PendingRequest {
    fn settle(self, outcome: Result<Value, RequestError>) {
        self.timer.abort();
        // the caller may have given up already
        let _ = self.reply.send(outcome);
    }
}

pub struct Correlator {
    label: String,
    pending: Arc<DashMap<String, PendingRequest>>,
    outbound: FrameSender,
    codec: MessageCodec,
    default_timeout: Duration,
    closed: AtomicBool,
}

impl Correlator {
    /// `label` names the peer in log output
    pub fn new(
        label: impl Into<String>,
        outbound: FrameSender,
        codec: MessageCodec,
        default_timeout: Duration,
    ) -> Self {
        Self {
            label: label.into(),
            pending: Arc::new(DashMap::new()),
            outbound,
            codec,
            default_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send a Call and wait for its CallResult, CallError, timeout or close
    #[instrument(skip(self, payload), fields(device = %self.label))]
    pub async fn send(&self, action: &str, payload: Value, timeout: Duration) -> Result<Value, RequestError> {
        if self.is_closed() {
            return Err(RequestError::ConnectionClosed);
        }

        let (reply, outcome) = oneshot::channel();
        let id = self.insert_pending(action, timeout, reply);

        // close_all may have drained the table between the check above and the insert
        if self.is_closed() {
            if let Some((_, pending)) = self.pending.remove(&id) {
                pending.settle(Err(RequestError::ConnectionClosed));
            }
        } else {
            let frame = self.codec.encode_call(&id, action, &payload);
            if self.outbound.send(Outbound::Text(frame)).is_err() {
                if let Some((_, pending)) = self.pending.remove(&id) {
                    pending.settle(Err(RequestError::ConnectionClosed));
                }
            } else {
                debug!(%id, "call sent");
            }
        }

        outcome.await.unwrap_or(Err(RequestError::ConnectionClosed))
    }

    /// Same as [`send`](Self::send) with the default timeout
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, RequestError> {
        self.send(action, payload, self.default_timeout).await
    }

    fn insert_pending(&self, action: &str, timeout: Duration, reply: Reply) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            match self.pending.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let timer = self.arm_timer(id.clone(), action.to_string(), timeout);
                    slot.insert(PendingRequest {
                        action: action.to_string(),
                        created_at: Instant::now(),
                        timer,
                        reply,
                    });
                    return id;
                }
            }
        }
    }

    fn arm_timer(&self, id: String, action: String, timeout: Duration) -> AbortHandle {
        let pending = Arc::clone(&self.pending);
        let label = self.label.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, request)) = pending.remove(&id) {
                warn!(device = %label, %id, %action, ?timeout, "call timed out");
                // the timer is this task; nothing to abort
                let _ = request.reply.send(Err(RequestError::Timeout { action, timeout }));
            }
        })
        .abort_handle()
    }

    /// Fulfil a pending request with a CallResult payload
    pub fn resolve(&self, id: &str, payload: Value) -> Result<(), CorrelationError> {
        self.settle(id, Ok(payload))
    }

    /// Fail a pending request, typically with a peer CallError
    pub fn reject(&self, id: &str, error: RequestError) -> Result<(), CorrelationError> {
        self.settle(id, Err(error))
    }

    fn settle(&self, id: &str, outcome: Result<Value, RequestError>) -> Result<(), CorrelationError> {
        let (_, pending) = self
            .pending
            .remove(id)
            .ok_or_else(|| CorrelationError::UnknownCorrelationId(id.to_string()))?;
        debug!(
            device = %self.label,
            %id,
            action = %pending.action,
            elapsed = ?pending.created_at.elapsed(),
            ok = outcome.is_ok(),
            "call settled"
        );
        pending.settle(outcome);
        Ok(())
    }

    /// Reject everything still pending with `ConnectionClosed` and refuse new
    /// sends. Returns how many requests were rejected.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut rejected = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                pending.settle(Err(RequestError::ConnectionClosed));
                rejected += 1;
            }
        }
        if rejected > 0 {
            debug!(device = %self.label, rejected, "pending calls rejected on close");
        }
        rejected
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.close_all();
    }
}
