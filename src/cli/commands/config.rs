// configコマンドの実装

use std::path::PathBuf;

use tracing::info;

use crate::cli::commands::CommandResult;
use crate::cli::{ConfigAction, ConfigArgs};
use crate::common::config::Config;
use crate::common::error::Error;

const SAMPLE_FILE: &str = "ocpp-central.toml";

/// `file` is the global `--config` flag, `effective` the loaded config
pub async fn execute(args: ConfigArgs, file: Option<PathBuf>, effective: Config) -> CommandResult {
    match args.action {
        ConfigAction::Show => show_config(&effective),
        ConfigAction::Validate { file: explicit } => validate_config(explicit.or(file)),
        ConfigAction::Generate { output } => generate_config(output),
    }
}

fn show_config(config: &Config) -> CommandResult {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
    println!("{}", toml_str);
    Ok(())
}

fn validate_config(file: Option<PathBuf>) -> CommandResult {
    let config_path = file
        .or_else(Config::default_path)
        .ok_or_else(|| Error::config("No configuration file given and no default location available"))?;

    if !config_path.exists() {
        return Err(Error::config(format!(
            "Configuration file '{}' not found",
            config_path.display()
        )));
    }

    info!("Validating configuration file: {}", config_path.display());

    match Config::from_file(&config_path) {
        Ok(config) => {
            println!("✅ Configuration is valid");
            println!("🔌 Listening on {}", config.server.bind);
            println!("📡 Subprotocols: {}", config.server.supported_versions.join(", "));
            println!(
                "🏷️  {} tenant(s){}",
                config.tenants.names.len(),
                if config.server.require_tenant { ", tenant segment required" } else { "" }
            );
            for name in &config.tenants.names {
                println!("   - {}", name);
            }
        }
        Err(e) => {
            println!("❌ Configuration validation failed: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

fn generate_config(output: Option<PathBuf>) -> CommandResult {
    let output_path = output.unwrap_or_else(|| PathBuf::from(SAMPLE_FILE));

    if output_path.exists() {
        return Err(Error::config(format!(
            "Output file '{}' already exists",
            output_path.display()
        )));
    }

    Config::sample().to_file(&output_path)?;

    println!("✅ Sample configuration generated: {}", output_path.display());
    println!("📝 Edit the tenant list and bind address before running 'ocpp-central serve'");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_then_validate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("central.toml");

        generate_config(Some(path.clone())).unwrap();
        validate_config(Some(path.clone())).unwrap();

        // refuses to overwrite
        assert!(generate_config(Some(path)).is_err());
    }

    #[test]
    fn test_validate_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(validate_config(Some(dir.path().join("absent.toml"))).is_err());
    }
}
