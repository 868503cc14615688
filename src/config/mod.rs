//! Configuration loading and parsing.
//!
//! Provides YAML-based configuration for the service (hearth.yaml).
//! Every field has a default, so an empty file (or no file) yields a
//! working local setup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Service configuration (hearth.yaml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Wire-protocol settings.
    pub wire: WireConfig,
    /// Push delivery settings.
    pub push: PushConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            wire: WireConfig::default(),
            push: PushConfig::default(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8430,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Wire-protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Topic prefix for timer state and command topics.
    pub topic_prefix: String,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "hearth".to_string(),
        }
    }
}

/// Push delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// TTL handed to the push service, in seconds.
    pub ttl_seconds: u32,
    /// Per-request delivery timeout, in seconds.
    pub timeout_seconds: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 60,
            timeout_seconds: 10,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "server.host must not be empty".to_string(),
            ));
        }
        if self.wire.topic_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "wire.topic_prefix must not be empty".to_string(),
            ));
        }
        if let StorageConfig::Sqlite { path } = &self.storage {
            if path.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "storage.path must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
