// Command line interface
//
// Argument parsing for the central system binary

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(
    name = "ocpp-central",
    about = "OCPP central system",
    version = env!("CARGO_PKG_VERSION"),
    long_about = "ocpp-central accepts OCPP-J charge point connections over WebSocket, negotiates their protocol version and identity, and exchanges calls with them."
)]
pub struct CliArgs {
    /// Configuration file (default: $XDG_CONFIG_HOME/ocpp-central/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the central system until interrupted
    Serve(ServeArgs),

    /// Send one call to a charge point and print the result
    Call(CallArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Show version information
    Version,
}

#[derive(Parser)]
pub struct ServeArgs {
    /// Address to accept charge points on, overriding the config file
    #[arg(short, long, value_name = "HOST:PORT")]
    pub bind: Option<SocketAddr>,

    /// Refuse connection paths without a tenant segment
    #[arg(long)]
    pub require_tenant: bool,
}

#[derive(Parser)]
pub struct CallArgs {
    /// Charge point endpoint, e.g. ws://10.0.0.5:8080/ocpp/CP001
    #[arg(short, long, value_name = "URL")]
    pub url: String,

    /// Action name, e.g. Reset
    #[arg(short, long)]
    pub action: String,

    /// JSON payload
    #[arg(short, long, default_value = "{}")]
    pub payload: String,

    /// Subprotocol to offer
    #[arg(long, value_name = "TOKEN", default_value = "ocpp1.6")]
    pub subprotocol: String,

    /// Response timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Retries before giving up, -1 for unlimited
    #[arg(long, allow_hyphen_values = true)]
    pub max_retries: Option<i32>,

    /// Delay between retries in milliseconds
    #[arg(long, value_name = "MS")]
    pub backoff_ms: Option<u64>,
}

#[derive(Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Write a sample configuration file
    Generate {
        /// Output file path
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}
