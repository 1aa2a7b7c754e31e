// Central system configuration
//
// Settings are read from several sources, later ones winning:
// config file > environment variables > CLI flags

use crate::common::error::{Error, Result};
use crate::common::types::ProtocolVersion;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub tenants: TenantsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    // Subprotocol tokens in preference order
    pub supported_versions: Vec<String>,
    // Refuse `/{prefix}/{device}` paths without a tenant segment
    pub require_tenant: bool,
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9220".to_string(),
            supported_versions: vec!["ocpp1.6".to_string(), "ocpp2.0.1".to_string()],
            require_tenant: false,
            max_frame_size: 64 * 1024,
        }
    }
}

// Request/response timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    pub call_timeout_ms: u64,
    // Interval handed to charge points in BootNotification responses
    pub heartbeat_interval_seconds: u32,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: 60_000,
            heartbeat_interval_seconds: 300,
        }
    }
}

// Outbound client reconnection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    // -1 means retry forever
    pub max_retries: i32,
    pub backoff_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantsConfig {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    // Daily rolling log files are written here when set
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

impl Config {
    // Read and validate a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    // Load from the given path, or the default location if it exists, then apply env overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    // Write the config as pretty TOML
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    // `$XDG_CONFIG_HOME/ocpp-central/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ocpp-central").join("config.toml"))
    }

    // Sample configuration for `config generate`
    pub fn sample() -> Self {
        Config {
            server: ServerConfig {
                require_tenant: true,
                ..ServerConfig::default()
            },
            tenants: TenantsConfig {
                names: vec!["tenantA".to_string(), "tenantB".to_string()],
            },
            ..Config::default()
        }
    }

    // Override settings from OCPP_* environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(bind) = std::env::var("OCPP_SERVER_BIND") {
            self.server.bind = bind;
        }
        if let Some(value) = env_parse::<bool>("OCPP_REQUIRE_TENANT")? {
            self.server.require_tenant = value;
        }
        if let Some(value) = env_parse::<u64>("OCPP_CALL_TIMEOUT_MS")? {
            self.protocol.call_timeout_ms = value;
        }
        if let Some(value) = env_parse::<i32>("OCPP_MAX_RETRIES")? {
            self.client.max_retries = value;
        }
        if let Some(value) = env_parse::<u64>("OCPP_BACKOFF_MS")? {
            self.client.backoff_ms = value;
        }
        if let Ok(level) = std::env::var("OCPP_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("OCPP_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                other => return Err(Error::config(format!("Invalid log format: {}", other))),
            };
        }
        Ok(())
    }

    // Check the config for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.server.bind_addr()?;

        if self.server.max_frame_size == 0 {
            return Err(Error::config("max_frame_size cannot be 0"));
        }

        self.server.versions()?;

        if self.protocol.call_timeout_ms == 0 {
            return Err(Error::config("call_timeout_ms cannot be 0"));
        }

        if self.client.max_retries < -1 {
            return Err(Error::config(format!(
                "max_retries must be -1 (unlimited) or >= 0, got {}",
                self.client.max_retries
            )));
        }

        let mut names = std::collections::HashSet::new();
        for name in &self.tenants.names {
            if name.is_empty() || name.contains('/') {
                return Err(Error::config(format!("Invalid tenant name: {:?}", name)));
            }
            if !names.insert(name) {
                return Err(Error::config(format!("Duplicate tenant name: {}", name)));
            }
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|_| Error::config(format!("Invalid bind address: {}", self.bind)))
    }

    // Supported versions in preference order
    pub fn versions(&self) -> Result<Vec<ProtocolVersion>> {
        if self.supported_versions.is_empty() {
            return Err(Error::config("At least one protocol version must be supported"));
        }
        self.supported_versions
            .iter()
            .map(|token| {
                ProtocolVersion::from_subprotocol(token)
                    .ok_or_else(|| Error::config(format!("Unsupported subprotocol: {}", token)))
            })
            .collect()
    }
}

impl ProtocolSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(None),
    }
}
