//! Coordinator configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Tuning knobs for a [`TransactionCoordinator`](super::TransactionCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// A participant's rollback marks the shared transaction rollback-only.
    ///
    /// When disabled, a participant rollback is ignored and only the scope
    /// that started the transaction decides its outcome.
    pub global_rollback_on_participation_failure: bool,
    /// Number of finished transactions kept for inspection.
    pub history_limit: usize,
    /// Maximum number of nested scopes per chain.
    pub max_depth: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            global_rollback_on_participation_failure: true,
            history_limit: 128,
            max_depth: 64,
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set global_rollback_on_participation_failure flag.
    pub fn global_rollback_on_participation_failure(mut self, value: bool) -> Self {
        self.global_rollback_on_participation_failure = value;
        self
    }

    /// Set history_limit.
    pub fn history_limit(mut self, value: usize) -> Self {
        self.history_limit = value;
        self
    }

    /// Set max_depth.
    pub fn max_depth(mut self, value: usize) -> Self {
        self.max_depth = value;
        self
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".into()));
        }
        Ok(())
    }
}
