use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub lavalink: LavalinkConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub punishment: PunishmentConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config.toml or config.default.toml not found")]
    NotFound,
    #[error("{0} is empty")]
    Empty(String),
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = ["config.toml", "config.default.toml"]
            .into_iter()
            .find(|p| Path::new(p).exists())
            .ok_or(ConfigError::NotFound)?;

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.trim().is_empty() {
            return Err(ConfigError::Empty(config_path.to_string()));
        }

        let config = Self::from_toml_str(&config_str)?;
        tracing::info!("Loaded configuration from {}", config_path);
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}
