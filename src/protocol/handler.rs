// Command dispatch
//
// Inbound Calls are routed through an explicit (version, action) table
// populated at startup. Handler failures are classified into the two
// CallError codes a peer may see; anything unregistered is NotImplemented.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::common::types::{Identity, ProtocolVersion};
use crate::protocol::messages::{ErrorCode, Frame};

/// What a handler knows about the caller
#[derive(Debug, Clone)]
pub struct CallContext {
    pub identity: Identity,
}

impl CallContext {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.identity.version
    }
}

/// Failure raised from inside a handler
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload was unacceptable; the message goes back to the peer
    #[error("{0}")]
    FormationViolation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Outcome of a dispatch that did not produce a result
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler for {action} in OCPP {version}")]
    NotImplemented { version: ProtocolVersion, action: String },

    #[error("{0}")]
    FormationViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DispatchError::NotImplemented { .. } => ErrorCode::NotImplemented,
            DispatchError::FormationViolation(_) => ErrorCode::FormationViolation,
            DispatchError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Text sent to the peer. Internal detail stays in the log.
    pub fn peer_description(&self) -> String {
        match self {
            DispatchError::NotImplemented { action, .. } => format!("Unknown action {}", action),
            DispatchError::FormationViolation(message) => message.clone(),
            DispatchError::Internal(_) => "Internal error while processing the request".to_string(),
        }
    }

    /// Frame answering the Call with id `id`
    pub fn to_frame(&self, id: impl Into<String>) -> Frame {
        Frame::error(id, self.error_code(), self.peer_description())
    }
}

/// One action implementation for one protocol version
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn invoke(&self, ctx: &CallContext, payload: Value) -> Result<Value, HandlerError>;
}

/// Lookup table from (version, action) to handler
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: HashMap<(ProtocolVersion, String), Arc<dyn CommandHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`; an existing entry for the same key is replaced
    pub fn register<H>(&mut self, version: ProtocolVersion, action: impl Into<String>, handler: H) -> &mut Self
    where
        H: CommandHandler + 'static,
    {
        let action = action.into();
        debug!(%version, %action, "handler registered");
        self.handlers.insert((version, action), Arc::new(handler));
        self
    }

    pub fn get(&self, version: ProtocolVersion, action: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&(version, action.to_string())).cloned()
    }

    /// Actions registered for `version`, sorted
    pub fn actions(&self, version: ProtocolVersion) -> Vec<String> {
        let mut actions: Vec<String> = self
            .handlers
            .keys()
            .filter(|(v, _)| *v == version)
            .map(|(_, action)| action.clone())
            .collect();
        actions.sort();
        actions
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for `action` under the caller's protocol version
    pub async fn invoke(&self, ctx: &CallContext, action: &str, payload: Value) -> Result<Value, DispatchError> {
        let identity = &ctx.identity;
        let Some(handler) = self.get(identity.version, action) else {
            warn!(device = %identity, %action, outcome = "not_implemented", "dispatch");
            return Err(DispatchError::NotImplemented {
                version: identity.version,
                action: action.to_string(),
            });
        };

        match handler.invoke(ctx, payload).await {
            Ok(result) => {
                info!(device = %identity, %action, outcome = "ok", "dispatch");
                Ok(result)
            }
            Err(HandlerError::FormationViolation(message)) => {
                warn!(device = %identity, %action, outcome = "formation_violation", %message, "dispatch");
                Err(DispatchError::FormationViolation(message))
            }
            Err(HandlerError::Internal(e)) => {
                error!(device = %identity, %action, outcome = "internal_error", error = ?e, "dispatch");
                Err(DispatchError::Internal(e.to_string()))
            }
        }
    }

    /// Answer an inbound Call with a CallResult or CallError frame
    pub async fn dispatch(&self, ctx: &CallContext, id: &str, action: &str, payload: Value) -> Frame {
        match self.invoke(ctx, action, payload).await {
            Ok(payload) => Frame::CallResult {
                id: id.to_string(),
                payload,
            },
            Err(e) => e.to_frame(id),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("Dispatcher").field("handlers", &keys).finish()
    }
}

/// Handler over typed request and response bodies
pub struct TypedHandler<F, Req, Resp> {
    f: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

/// Adapt a closure over serde types into a [`CommandHandler`].
/// Payloads that do not deserialize into `Req` are formation violations.
pub fn typed<F, Req, Resp>(f: F) -> TypedHandler<F, Req, Resp>
where
    F: Fn(&CallContext, Req) -> Result<Resp, HandlerError> + Send + Sync,
    Req: DeserializeOwned,
    Resp: Serialize,
{
    TypedHandler {
        f,
        _types: PhantomData,
    }
}

#[async_trait]
impl<F, Req, Resp> CommandHandler for TypedHandler<F, Req, Resp>
where
    F: Fn(&CallContext, Req) -> Result<Resp, HandlerError> + Send + Sync,
    Req: DeserializeOwned,
    Resp: Serialize,
{
    async fn invoke(&self, ctx: &CallContext, payload: Value) -> Result<Value, HandlerError> {
        let request: Req =
            serde_json::from_value(payload).map_err(|e| HandlerError::FormationViolation(e.to_string()))?;
        let response = (self.f)(ctx, request)?;
        serde_json::to_value(response).map_err(|e| HandlerError::Internal(e.into()))
    }
}
