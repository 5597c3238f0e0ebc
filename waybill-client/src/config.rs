//! Configuration loading for WAYBILL.
//!
//! One TOML file with a required `[client]` table and an optional `[fetch]`
//! table. The path comes from `--config <path>` or `WAYBILL_CONFIG`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use waybill_core::{ConfigError, FetchConfig};

/// Default path of the RPC endpoint under `base_url`.
pub const DEFAULT_RPC_PATH: &str = "/rest/v1/rpc";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaybillConfig {
    pub client: ClientConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

fn default_rpc_path() -> String {
    DEFAULT_RPC_PATH.to_string()
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            rpc_path: default_rpc_path(),
            api_key: None,
            bearer_token: None,
        }
    }

    pub fn with_rpc_path(mut self, path: impl Into<String>) -> Self {
        self.rpc_path = path.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("client.base_url", "must not be empty"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::invalid(
                "client.base_url",
                "must start with http:// or https://",
            ));
        }
        if !self.rpc_path.is_empty() && !self.rpc_path.starts_with('/') {
            return Err(ConfigError::invalid("client.rpc_path", "must start with '/'"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Missing configuration file path (use --config or WAYBILL_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

impl WaybillConfig {
    pub fn load() -> Result<Self, LoadError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(LoadError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, LoadError> {
        let config: WaybillConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        self.fetch.validate()
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("WAYBILL_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

// =============================================================================
// TESTS
// =============================================================================
