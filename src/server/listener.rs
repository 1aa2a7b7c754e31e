// Accept loop
//
// Every accepted socket is negotiated inside the upgrade callback. A
// refused negotiation answers the HTTP request with an error status and
// never constructs a Connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info, instrument, warn};

use crate::common::error::{Error, Result};
use crate::common::types::{Identity, ProtocolVersion};
use crate::protocol::{Dispatcher, MessageCodec};
use crate::registry::{ConnectionRegistry, TenantLookup};
use crate::server::connection::Connection;
use crate::server::handshake::{offered_subprotocols, Negotiator};
use crate::transport::websocket::spawn_link;

/// Runtime settings of the listener
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Preference order
    pub supported: Vec<ProtocolVersion>,
    pub require_tenant: bool,
    pub codec: MessageCodec,
    pub call_timeout: Duration,
}

#[derive(Clone)]
pub(crate) struct Listener {
    pub(crate) settings: Arc<ListenerSettings>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) tenants: Arc<dyn TenantLookup>,
    pub(crate) registry: Arc<ConnectionRegistry>,
}

impl Listener {
    pub(crate) async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(%local, "central system listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let this = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = this.serve_socket(stream, peer).await {
                                debug!(%peer, error = %e, "socket ended before a connection was established");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
            }
        }
        Ok(())
    }

    #[instrument(skip(self, stream))]
    async fn serve_socket(self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let mut negotiated: Option<Identity> = None;
        let settings = Arc::clone(&self.settings);
        let tenants = Arc::clone(&self.tenants);

        let callback = |request: &Request, mut response: Response| -> std::result::Result<Response, ErrorResponse> {
            let offered = offered_subprotocols(request.headers());
            let negotiator = Negotiator {
                supported: &settings.supported,
                tenants: tenants.as_ref(),
                require_tenant: settings.require_tenant,
            };
            match negotiator.negotiate(request.uri().path(), &offered) {
                Ok(identity) => {
                    if let Some(token) = identity.version.subprotocol() {
                        response
                            .headers_mut()
                            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(token));
                    }
                    negotiated = Some(identity);
                    Ok(response)
                }
                Err(e) => {
                    warn!(path = %request.uri().path(), error = %e, "handshake refused");
                    let mut refusal = ErrorResponse::new(Some(e.to_string()));
                    *refusal.status_mut() = e.status();
                    Err(refusal)
                }
            }
        };

        let socket = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
        let identity = negotiated.ok_or_else(|| Error::generic("upgrade completed without an identity"))?;
        info!(device = %identity, version = %identity.version, "charge point connected");

        let link = spawn_link(socket, identity.to_string());
        let connection = Connection::new(
            identity,
            link,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.registry),
            self.settings.codec,
            self.settings.call_timeout,
        );
        connection.opened();
        if let Some(displaced) = self.registry.register(Arc::clone(connection.handle())) {
            displaced.close("replaced by a newer connection");
        }

        connection.run().await;
        Ok(())
    }
}
