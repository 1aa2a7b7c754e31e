// serveコマンドの実装
//
// Builds the dispatcher and tenant table from configuration and runs the
// central system until Ctrl-C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};

use crate::cli::commands::CommandResult;
use crate::cli::ServeArgs;
use crate::common::config::Config;
use crate::ocpp::register_core_handlers;
use crate::protocol::Dispatcher;
use crate::registry::InMemoryTenants;
use crate::server::CentralSystem;

// Upper bound on waiting for connections to finish their close handshake
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn execute(args: ServeArgs, mut config: Config) -> CommandResult {
    if let Some(bind) = args.bind {
        config.server.bind = bind.to_string();
    }
    if args.require_tenant {
        config.server.require_tenant = true;
    }
    config.validate()?;

    let tenants = Arc::new(InMemoryTenants::from_names(config.tenants.names.iter().cloned()));
    let mut dispatcher = Dispatcher::new();
    register_core_handlers(&mut dispatcher, config.protocol.heartbeat_interval_seconds);

    let system = CentralSystem::new(&config, dispatcher, tenants.clone())?;
    info!(
        bind = %config.server.bind,
        versions = ?config.server.supported_versions,
        tenants = tenants.len(),
        require_tenant = config.server.require_tenant,
        "starting central system"
    );
    if config.server.bind.starts_with("0.0.0.0") {
        warn!("binding to 0.0.0.0; charge point endpoints are reachable from the network without TLS");
    }

    system.serve(shutdown_signal()).await?;

    let open = system.registry().len();
    let closed = system.close_all("central system shutting down", SHUTDOWN_GRACE).await;
    if closed < open {
        warn!(open, closed, "some connections did not finish closing");
    }
    info!(closed, "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! { _ = ctrl_c => {}, _ = terminate => {}, }
    info!("shutdown signal received");
}
