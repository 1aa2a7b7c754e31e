//! ocpp-central - OCPP central system
//!
//! This is the main entry point for the ocpp-central CLI application.

use clap::Parser;
use std::process;
use tracing::{error, info};

use ocpp_central::cli::{self, CliArgs, Commands};
use ocpp_central::common::logging::init_logging;
use ocpp_central::Config;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    // Initialize logging; the guard flushes file output on drop
    let guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    info!(version = ocpp_central::VERSION, "ocpp-central starting up");

    // Execute subcommand
    let result = match args.command {
        Commands::Serve(cmd) => cli::commands::serve::execute(cmd, config).await,
        Commands::Call(cmd) => cli::commands::call::execute(cmd, config).await,
        Commands::Config(cmd) => cli::commands::config::execute(cmd, args.config, config).await,
        Commands::Version => cli::commands::version::execute().await,
    };

    // Error handling
    if let Err(e) = result {
        error!("Command execution failed: {}", e);
        eprintln!("Error: {}", e);
        drop(guard);
        process::exit(1);
    }
}
