//! Write-Behind Configuration
//!
//! Loaded from TOML or from `WRITE_BEHIND_*` environment variables; anything
//! unset keeps its default.
//!
//! ```toml
//! cache_alias = "users"
//! coalesce = true
//! max_batch_size = 64
//! ```

use crate::operations::CoalescingPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_CACHE_ALIAS: &str = "WRITE_BEHIND_CACHE_ALIAS";
pub const ENV_COALESCE: &str = "WRITE_BEHIND_COALESCE";
pub const ENV_MAX_BATCH_SIZE: &str = "WRITE_BEHIND_MAX_BATCH_SIZE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for one write-behind queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBehindConfig {
    /// Cache the queue belongs to; statistics are registered under it
    pub cache_alias: String,
    /// Keep only the latest pending operation per key at flush time
    pub coalesce: bool,
    /// Maximum entries per bulk call; 1 applies every operation individually
    pub max_batch_size: usize,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        WriteBehindConfig {
            cache_alias: "default".to_string(),
            coalesce: true,
            max_batch_size: 64,
        }
    }
}

impl WriteBehindConfig {
    /// Configuration for tests (small batches)
    pub fn test() -> Self {
        WriteBehindConfig {
            cache_alias: "test".to_string(),
            coalesce: true,
            max_batch_size: 4,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: WriteBehindConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Defaults overridden by `WRITE_BEHIND_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply `WRITE_BEHIND_*` environment variables on top of `self`
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(alias) = lookup(ENV_CACHE_ALIAS) {
            self.cache_alias = alias;
        }
        if let Some(raw) = lookup(ENV_COALESCE) {
            self.coalesce = match raw.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "{} must be a boolean, got {:?}",
                        ENV_COALESCE, other
                    )))
                }
            };
        }
        if let Some(raw) = lookup(ENV_MAX_BATCH_SIZE) {
            self.max_batch_size = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "{} must be a positive integer, got {:?}",
                    ENV_MAX_BATCH_SIZE, raw
                ))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_alias.trim().is_empty() {
            return Err(ConfigError::Invalid("cache_alias must not be empty".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> CoalescingPolicy {
        CoalescingPolicy {
            coalesce: self.coalesce,
            max_batch_size: self.max_batch_size,
        }
    }
}
