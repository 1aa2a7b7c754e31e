//! Central system server
//!
//! [`CentralSystem`] ties the pieces together: it owns the connection
//! registry, accepts charge point sockets, negotiates their identity and
//! runs one [`Connection`] task per accepted device.

pub mod connection;
pub mod handshake;
pub mod listener;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::common::config::Config;
use crate::common::error::Result;
use crate::common::types::ConnectionState;
use crate::protocol::{Dispatcher, MessageCodec};
use crate::registry::{ConnectionRegistry, TenantLookup};

pub use connection::{Connection, ConnectionHandle};
pub use handshake::{IdentityError, Negotiator};
pub use listener::ListenerSettings;

use listener::Listener;

pub struct CentralSystem {
    bind: std::net::SocketAddr,
    listener: Listener,
}

impl CentralSystem {
    pub fn new(config: &Config, dispatcher: Dispatcher, tenants: Arc<dyn TenantLookup>) -> Result<Self> {
        let settings = ListenerSettings {
            supported: config.server.versions()?,
            require_tenant: config.server.require_tenant,
            codec: MessageCodec::new(config.server.max_frame_size),
            call_timeout: config.protocol.call_timeout(),
        };
        Ok(Self {
            bind: config.server.bind_addr()?,
            listener: Listener {
                settings: Arc::new(settings),
                dispatcher: Arc::new(dispatcher),
                tenants,
                registry: Arc::new(ConnectionRegistry::new()),
            },
        })
    }

    /// Registry shared with outer layers issuing calls to devices
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.listener.registry)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.listener.dispatcher)
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.listener.settings
    }

    /// Bind the configured address and accept until `shutdown` resolves
    pub async fn serve<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.bind).await?;
        self.serve_with_listener(listener, shutdown).await
    }

    /// Close every registered connection and wait up to `grace` for each to
    /// reach `Closed`. Returns how many did.
    pub async fn close_all(&self, reason: &str, grace: Duration) -> usize {
        let registry = &self.listener.registry;
        let handles: Vec<_> = registry
            .identities()
            .iter()
            .filter_map(|identity| registry.lookup_identity(identity))
            .collect();
        for handle in &handles {
            handle.close(reason);
        }

        let outcomes = futures::future::join_all(handles.iter().map(|handle| async move {
            let mut state = handle.subscribe_state();
            let reached = tokio::time::timeout(grace, state.wait_for(|state| *state == ConnectionState::Closed)).await;
            matches!(reached, Ok(Ok(_)))
        }))
        .await;
        outcomes.into_iter().filter(|closed| *closed).count()
    }

    /// Accept on an already bound listener
    pub async fn serve_with_listener<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.listener.clone().run(listener, shutdown).await
    }
}
