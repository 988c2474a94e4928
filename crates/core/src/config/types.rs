use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::acquisition::SimulationConfig;
use crate::orchestrator::{CycleSettings, ItemEntry, OrchestratorConfig};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Tracked items in priority order.
    #[serde(default)]
    pub items: Vec<ItemEntry>,
}

impl Config {
    /// Settings for the cycle orchestrator derived from this config.
    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings::from_config(&self.orchestrator, &self.items)
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Required when `method = "api_key"`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// User id recorded for requests authenticated with the API key.
    #[serde(default = "default_operator")]
    pub operator: String,
}

fn default_operator() -> String {
    "operator".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::ApiKey => "api_key",
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where item state is persisted
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("dropwatch-state.json")
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Whole-map JSON document, replaced atomically on every change.
    #[default]
    Json,
    Sqlite,
    /// Nothing survives a restart.
    Memory,
}

/// Availability source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub source: FeedSource,
    /// JSON file re-read every cycle (`source = "file"`).
    #[serde(default = "default_feed_path")]
    pub path: PathBuf,
    /// Ids reported available (`source = "static"`).
    #[serde(default)]
    pub available: Vec<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: FeedSource::default(),
            path: default_feed_path(),
            available: Vec::new(),
        }
    }
}

fn default_feed_path() -> PathBuf {
    PathBuf::from("availability.json")
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    #[default]
    File,
    Static,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub orchestrator: OrchestratorConfig,
    pub feed: FeedConfig,
    pub simulation: SimulationConfig,
    pub items: Vec<ItemEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_key_configured: bool,
    pub operator: String,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: config.auth.method.as_str().to_string(),
                api_key_configured: config
                    .auth
                    .api_key
                    .as_ref()
                    .is_some_and(|k| !k.is_empty()),
                operator: config.auth.operator.clone(),
            },
            server: config.server.clone(),
            logging: config.logging.clone(),
            storage: config.storage.clone(),
            orchestrator: config.orchestrator.clone(),
            feed: config.feed.clone(),
            simulation: config.simulation.clone(),
            items: config.items.clone(),
        }
    }
}
