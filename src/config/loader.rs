use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::types::StateConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl StateConfig {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/statekit/config.toml` on Unix/macOS,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("statekit").join("config.toml")
    }

    /// Loads configuration from the default config file.
    ///
    /// - If the file doesn't exist, returns `StateConfig::default()`.
    /// - If the file exists, parses it as TOML and validates.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(StateConfig::default());
        }

        Self::load_from(&path)
    }

    /// Loads and validates configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: StateConfig = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StateConfig = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - Default locale and theme are non-empty
    /// - A cache bound, if set, allows at least one entry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.defaults.locale.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "Default locale must not be empty".to_string(),
            });
        }

        if self.defaults.theme.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "Default theme must not be empty".to_string(),
            });
        }

        if self.cache.max_entries == Some(0) {
            return Err(ConfigError::ValidationError {
                message: "cache.max_entries must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}
