//! Global configuration management for Varia.
//!
//! This module handles the user configuration file (`~/.varia/config.toml`) which
//! stores user-wide defaults for rendering. Every key is optional; a missing file
//! behaves like an empty one.
//!
//! # Configuration File Location
//!
//! - **Unix/macOS**: `~/.varia/config.toml`
//! - **Windows**: `%LOCALAPPDATA%\varia\config.toml`
//!
//! The location can be overridden with the global `--config` flag.
//!
//! # File Format
//!
//! ```toml
//! # User-level variant file, read before ./conda_build_config.yaml
//! variant_config_file = "~/.config/varia/conda_build_config.yaml"
//!
//! # Subdir rendered for when --platform is not given
//! target_platform = "linux-64"
//!
//! # Hex digits kept from the variant hash
//! hash_length = 7
//!
//! # Render variants on a thread pool
//! parallel = true
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use varia_cli::config::GlobalConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut config = GlobalConfig::load().await?;
//! config.hash_length = 10;
//! config.save_to(&GlobalConfig::default_path()?).await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::metadata::DEFAULT_HASH_LENGTH;

const fn default_hash_length() -> usize {
    DEFAULT_HASH_LENGTH
}

const fn default_parallel() -> bool {
    true
}

/// Global configuration structure for Varia.
///
/// # Examples
///
/// ```rust
/// use varia_cli::config::GlobalConfig;
///
/// let config = GlobalConfig::default();
/// assert_eq!(config.hash_length, 7);
/// assert!(config.parallel);
/// assert!(config.variant_config_file.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// User-level variant config file.
    ///
    /// Replaces `~/conda_build_config.yaml` in config discovery. `~` and
    /// environment variables are expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_config_file: Option<String>,

    /// Default target platform subdir, e.g. `linux-64`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_platform: Option<String>,

    #[serde(default = "default_hash_length", skip_serializing_if = "is_default_hash_length")]
    pub hash_length: usize,

    #[serde(default = "default_parallel", skip_serializing_if = "is_default_parallel")]
    pub parallel: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            variant_config_file: None,
            target_platform: None,
            hash_length: default_hash_length(),
            parallel: default_parallel(),
        }
    }
}

fn is_default_hash_length(length: &usize) -> bool {
    *length == default_hash_length()
}

fn is_default_parallel(parallel: &bool) -> bool {
    *parallel == default_parallel()
}

impl GlobalConfig {
    /// Load from the default location, or defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined, or the file
    /// exists but cannot be read or parsed.
    pub async fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_with_optional(Some(path)).await
    }

    /// Load from `path` when given, else from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read global config from {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse global config from {}", path.display()))
    }

    /// Save to a specific file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem operation fails.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize global config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write global config to {}", path.display()))?;
        Ok(())
    }

    /// The platform-specific location of the global config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the home (or local data) directory cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("varia")
        } else {
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?.join(".varia")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// The user-level variant file with `~` and environment variables expanded.
    ///
    /// # Errors
    ///
    /// Returns an error when the path references an undefined environment variable.
    pub fn expanded_variant_config_file(&self) -> Result<Option<PathBuf>> {
        self.variant_config_file
            .as_deref()
            .map(|path| {
                shellexpand::full(path)
                    .map(|expanded| PathBuf::from(expanded.as_ref()))
                    .with_context(|| format!("Failed to expand variant_config_file '{path}'"))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_global_config_default() {
        let config = GlobalConfig::default();
        assert_eq!(config.hash_length, DEFAULT_HASH_LENGTH);
        assert!(config.parallel);
        assert!(config.target_platform.is_none());
    }

    #[tokio::test]
    async fn test_global_config_save_load() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("nested").join("config.toml");

        let config = GlobalConfig {
            variant_config_file: Some("/opt/variants.yaml".to_string()),
            target_platform: Some("osx-arm64".to_string()),
            hash_length: 10,
            parallel: false,
        };
        config.save_to(&config_path).await.unwrap();

        let loaded = GlobalConfig::load_from(&config_path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_defaults_are_not_written() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        GlobalConfig::default().save_to(&config_path).await.unwrap();

        let content = tokio::fs::read_to_string(&config_path).await.unwrap();
        assert!(content.trim().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = GlobalConfig::load_with_optional(Some(temp.path().join("absent.toml"))).await.unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_toml_is_an_error() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        tokio::fs::write(&config_path, "hash_length = \"seven\"").await.unwrap();

        let err = GlobalConfig::load_from(&config_path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse global config"));
    }

    #[test]
    fn test_expanded_variant_config_file() {
        let config = GlobalConfig {
            variant_config_file: Some("/etc/varia/cbc.yaml".to_string()),
            ..GlobalConfig::default()
        };
        assert_eq!(config.expanded_variant_config_file().unwrap(), Some(PathBuf::from("/etc/varia/cbc.yaml")));
        assert_eq!(GlobalConfig::default().expanded_variant_config_file().unwrap(), None);
    }
}
