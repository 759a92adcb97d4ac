// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Namespace Configuration Types
//
// Defines the configuration schema for an anchorage namespace host:
// - Batch streaming sizes and flow control
// - Cluster membership defaults
// - Event bus buffering
// - Log level

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level namespace configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Batch streaming settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Cluster membership settings
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Event bus settings
    #[serde(default)]
    pub events: EventsConfig,

    /// Default log level (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Items per batch
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,

    /// Concurrently outstanding batches per stream
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Lifetime of a peer record without a refresh
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast buffer; slow subscribers lose the oldest events
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_batch_capacity() -> usize {
    64
}

fn default_max_in_flight() -> usize {
    8
}

fn default_ttl_secs() -> u64 {
    10
}

fn default_event_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_capacity: default_batch_capacity(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            cluster: ClusterConfig::default(),
            events: EventsConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl NamespaceConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. ANCHORAGE_CONFIG_PATH environment variable
    /// 2. ./anchorage.yaml (working directory)
    /// 3. ~/.anchorage/config.yaml (user home)
    /// 4. /etc/anchorage/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ANCHORAGE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./anchorage.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".anchorage").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/anchorage/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::debug!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Some(val) = env_usize("ANCHORAGE_BATCH_CAPACITY") {
            tracing::info!("Environment override: ANCHORAGE_BATCH_CAPACITY={}", val);
            self.stream.batch_capacity = val;
        }

        if let Some(val) = env_usize("ANCHORAGE_MAX_IN_FLIGHT") {
            tracing::info!("Environment override: ANCHORAGE_MAX_IN_FLIGHT={}", val);
            self.stream.max_in_flight = val;
        }

        if let Ok(val) = std::env::var("ANCHORAGE_LOG_LEVEL") {
            if !val.trim().is_empty() {
                tracing::info!("Environment override: ANCHORAGE_LOG_LEVEL={}", val);
                self.log_level = val.trim().to_string();
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stream.batch_capacity == 0 {
            anyhow::bail!("stream.batch_capacity must be greater than zero");
        }

        if self.stream.max_in_flight == 0 {
            anyhow::bail!("stream.max_in_flight must be greater than zero");
        }

        if self.events.capacity == 0 {
            anyhow::bail!("events.capacity must be greater than zero");
        }

        if self.cluster.default_ttl_secs == 0 {
            anyhow::bail!("cluster.default_ttl_secs must be greater than zero");
        }

        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    let val = std::env::var(key).ok()?;
    match val.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'. Expected an integer. Ignoring.", key, val);
            None
        }
    }
}
