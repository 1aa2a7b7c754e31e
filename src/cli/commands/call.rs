// callコマンドの実装

use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::cli::commands::CommandResult;
use crate::cli::CallArgs;
use crate::client::{ReconnectConfig, ReconnectingClient};
use crate::common::config::Config;
use crate::common::error::Error;
use crate::common::types::ProtocolVersion;

pub async fn execute(args: CallArgs, config: Config) -> CommandResult {
    let version = ProtocolVersion::from_subprotocol(&args.subprotocol)
        .ok_or_else(|| Error::config(format!("Unsupported subprotocol: {}", args.subprotocol)))?;
    let payload: Value = serde_json::from_str(&args.payload)?;

    let mut settings = config.client.clone();
    if let Some(max_retries) = args.max_retries {
        settings.max_retries = max_retries;
    }
    if let Some(backoff_ms) = args.backoff_ms {
        settings.backoff_ms = backoff_ms;
    }

    let mut reconnect = ReconnectConfig::from_settings(&args.url, version, &settings, &config.protocol)?;
    if let Some(timeout_ms) = args.timeout_ms {
        reconnect = reconnect.with_call_timeout(Duration::from_millis(timeout_ms));
    }

    info!(url = %args.url, action = %args.action, %version, "sending call");
    let client = ReconnectingClient::websocket(reconnect);
    let result = client.request(&args.action, payload).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
