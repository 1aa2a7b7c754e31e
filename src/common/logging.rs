//! Logging setup
//!
//! `RUST_LOG` wins over the configured level. When a log directory is set,
//! output goes to a daily rolling file through a non-blocking writer whose
//! guard must be held for the life of the process.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::common::config::{LogFormat, LoggingConfig};
use crate::common::error::{Error, Result};

/// Install the global tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},tungstenite=warn,tokio_tungstenite=warn", config.level)))
        .map_err(|e| Error::config(format!("Invalid log level {:?}: {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let (result, guard) = match (&config.directory, config.format) {
        (Some(dir), format) => {
            let appender = tracing_appender::rolling::daily(dir, "ocpp-central.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let builder = builder.with_writer(writer).with_ansi(false);
            let result = match format {
                LogFormat::Json => builder.json().try_init(),
                LogFormat::Pretty => builder.try_init(),
            };
            (result, Some(guard))
        }
        (None, LogFormat::Json) => (builder.json().try_init(), None),
        (None, LogFormat::Pretty) => (builder.try_init(), None),
    };

    result.map_err(|e| Error::generic(format!("Failed to install logger: {}", e)))?;
    Ok(guard)
}
