//! Registry configuration via `registry.toml`
//!
//! Every setting has a default, so an empty file (or no file at all) gives
//! the fail-fast behaviour.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "registry.toml";

/// What `load` does when declared fields disagree with persisted metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Fail with a schema mismatch error
    #[default]
    Fatal,
    /// Log the drift and keep going without altering anything
    Warn,
}

/// Registry configuration
///
/// # Example
///
/// ```toml
/// drift = "warn"
/// continue_on_error = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub drift: DriftPolicy,
    /// Skip bloks whose declarations fail instead of aborting the batch
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write config file '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RegistryConfig {
    /// Builder form for the drift policy
    pub fn with_drift(mut self, drift: DriftPolicy) -> Self {
        self.drift = drift;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Parse TOML text. `origin` names the source in errors.
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Read and parse config from a file path
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Blok registry configuration
#
# Drift policy when loading an installed blok: "fatal" (default) or "warn"
#   "fatal" = declared fields that disagree with persisted metadata abort the load
#   "warn"  = log the drift and load anyway; nothing is altered
drift = "fatal"

# Keep loading other bloks when one blok's declarations fail (default: false)
continue_on_error = false
"#
    }

    /// Write the default config file if it does not already exist
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}
