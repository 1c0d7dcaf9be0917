//! Configuration management for the file manager.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filemanager/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::object::MAX_LIST_PAGE_SIZE;
use crate::backend::BackendKind;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_list_page_size must be between 1 and 1000, got {0}")]
    InvalidPageSize(usize),

    #[error("max_tree_nodes must be greater than 0, got {0}")]
    InvalidMaxTreeNodes(usize),

    #[error("storage root must be an absolute path, got {0}")]
    RelativeRoot(String),

    #[error("object backend requires a bucket name")]
    MissingBucket,

    #[error("endpoint must start with http:// or https://, got {0}")]
    InvalidEndpoint(String),

    #[error("access_key and secret_key must be set together")]
    IncompleteCredentials,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the file manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Which backend to use and where the local root is.
    pub storage: StorageConfig,

    /// Object-store connection settings.
    pub object: ObjectConfig,

    /// Listing, tree and timeout limits.
    pub limits: LimitsConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Backend selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Active backend.
    pub backend: BackendKind,

    /// Root directory for the local backend.
    pub root: PathBuf,
}

/// S3-compatible object store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObjectConfig {
    /// Custom endpoint (MinIO, R2, ...). AWS is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Region name.
    pub region: String,

    /// Bucket name.
    pub bucket: String,

    /// Key prefix every path is anchored under.
    pub prefix: String,

    /// Use path-style addressing instead of virtual-host style.
    pub path_style: bool,

    /// Access key. Falls back to the environment or AWS profile when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// Secret key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

/// Limits applied to every operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Keys requested per listing page (1-1000).
    pub max_list_page_size: usize,

    /// Deepest level the tree builder expands (0 = unbounded).
    pub max_tree_depth: usize,

    /// Maximum number of nodes in one tree.
    pub max_tree_nodes: usize,

    /// Timeout for a single I/O step in seconds (0 = no timeout).
    pub operation_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            root: default_root(),
        }
    }
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            bucket: String::new(),
            prefix: String::new(),
            path_style: true,
            access_key: None,
            secret_key: None,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_list_page_size: MAX_LIST_PAGE_SIZE,
            max_tree_depth: 8,
            max_tree_nodes: 10_000,
            operation_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filemanager")
        .join("config.toml")
}

/// Returns the default local storage root.
fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("filemanager")
        .join("files")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FILEMANAGER_ROOT: Override the local storage root
    /// - FILEMANAGER_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FILEMANAGER_S3_ACCESS_KEY / FILEMANAGER_S3_SECRET_KEY: Object store credentials
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = env_value("FILEMANAGER_ROOT") {
            tracing::info!("Overriding storage root from environment: {}", root);
            self.storage.root = PathBuf::from(root);
        }

        if let Some(level) = env_value("FILEMANAGER_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.logging.log_level = level;
        }

        if let Some(access_key) = env_value("FILEMANAGER_S3_ACCESS_KEY") {
            tracing::info!("Overriding object access_key from environment");
            self.object.access_key = Some(access_key);
        }

        if let Some(secret_key) = env_value("FILEMANAGER_S3_SECRET_KEY") {
            tracing::info!("Overriding object secret_key from environment");
            self.object.secret_key = Some(secret_key);
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let page_size = self.limits.max_list_page_size;
        if !(1..=MAX_LIST_PAGE_SIZE).contains(&page_size) {
            return Err(ConfigError::InvalidPageSize(page_size));
        }

        if self.limits.max_tree_nodes == 0 {
            return Err(ConfigError::InvalidMaxTreeNodes(0));
        }

        match self.storage.backend {
            BackendKind::Local => {
                if !self.storage.root.is_absolute() {
                    return Err(ConfigError::RelativeRoot(
                        self.storage.root.display().to_string(),
                    ));
                }
            }
            BackendKind::Object => {
                if self.object.bucket.trim().is_empty() {
                    return Err(ConfigError::MissingBucket);
                }
                if let Some(endpoint) = &self.object.endpoint {
                    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                        return Err(ConfigError::InvalidEndpoint(endpoint.clone()));
                    }
                }
                if self.object.access_key.is_some() != self.object.secret_key.is_some() {
                    return Err(ConfigError::IncompleteCredentials);
                }
            }
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        Ok(())
    }

    /// Tree depth limit, `None` when unbounded.
    pub fn tree_depth(&self) -> Option<usize> {
        match self.limits.max_tree_depth {
            0 => None,
            depth => Some(depth),
        }
    }

    /// Per-step timeout, `None` when disabled.
    pub fn operation_timeout(&self) -> Option<Duration> {
        match self.limits.operation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
