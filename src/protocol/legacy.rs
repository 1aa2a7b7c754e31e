// Legacy envelope bridge
//
// OCPP 1.5 deployments reach the engine through envelope calls named
// `handle<Action>`. The bridge strips the prefix and reuses the same
// dispatcher table, so 1.5 is just another registered handler set.

use std::sync::Arc;

use serde_json::Value;

use crate::common::types::ProtocolVersion;
use crate::protocol::messages::ErrorCode;
use crate::protocol::{CallContext, Dispatcher};

const OPERATION_PREFIX: &str = "handle";

/// Fault returned in place of a response object
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {description}")]
pub struct LegacyFault {
    pub code: ErrorCode,
    pub description: String,
}

pub struct LegacyBridge {
    dispatcher: Arc<Dispatcher>,
    version: ProtocolVersion,
}

impl LegacyBridge {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            version: ProtocolVersion::V15,
        }
    }

    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Action name behind an envelope operation, if it has the expected shape
    pub fn action_for(operation: &str) -> Option<&str> {
        operation
            .strip_prefix(OPERATION_PREFIX)
            .filter(|action| action.starts_with(|c: char| c.is_ascii_uppercase()))
    }

    /// Run `operation` for the device in `ctx`. The context's version is
    /// overridden with the bridge's.
    pub async fn handle(&self, ctx: &CallContext, operation: &str, payload: Value) -> Result<Value, LegacyFault> {
        let action = Self::action_for(operation).ok_or_else(|| LegacyFault {
            code: ErrorCode::NotImplemented,
            description: format!("Unknown operation {}", operation),
        })?;

        let mut ctx = ctx.clone();
        ctx.identity.version = self.version;

        self.dispatcher
            .invoke(&ctx, action, payload)
            .await
            .map_err(|e| LegacyFault {
                code: e.error_code(),
                description: e.peer_description(),
            })
    }
}
