//! Configuration management for the image cache
//!
//! This module provides unified configuration management with multi-source
//! loading: defaults, then a TOML file, then environment variables, then
//! command line flags (applied by the caller).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::cache::{AttributeBackend, CacheConfig};
use crate::app::prefetch::PrefetchConfig;
use crate::constants::config;
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Cache settings
    pub cache: CacheConfigToml,
    /// Prefetch worker settings
    pub prefetch: PrefetchConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigToml {
    /// Create the cache directories at startup
    pub enabled: bool,
    /// Cache directory path (system cache directory if unset)
    pub cache_root: Option<PathBuf>,
    /// Attribute backend: auto, xattr, sidecar or memory
    pub attribute_backend: AttributeBackend,
}

impl Default for CacheConfigToml {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_root: None,
            attribute_backend: AttributeBackend::Auto,
        }
    }
}

impl CacheConfigToml {
    /// Convert to runtime CacheConfig
    pub fn to_runtime_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.enabled,
            cache_root: self.cache_root.clone(),
            attribute_backend: self.attribute_backend,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(&self) -> (CacheConfig, PrefetchConfig) {
        (self.cache.to_runtime_config(), self.prefetch.clone())
    }

    /// Load configuration with multi-source precedence:
    /// 1. Default values
    /// 2. Config file (explicit path, or the first one found)
    /// 3. Environment variables
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let config_path = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path });
                }
                Some(path)
            }
            None => Self::find_config_file(),
        };

        let mut config = match config_path {
            Some(path) => Self::load_from_file(&path).await?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.prefetch.validate()?;
        Ok(config)
    }

    /// Apply `IMAGE_CACHE_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(config::ENV_ENABLED) {
            self.cache.enabled = parse_flag(config::ENV_ENABLED, &value)?;
            debug!("Cache enabled overridden from environment: {}", self.cache.enabled);
        }
        if let Some(value) = lookup(config::ENV_CACHE_DIR) {
            if !value.trim().is_empty() {
                debug!("Cache root overridden from environment: {}", value);
                self.cache.cache_root = Some(PathBuf::from(value));
            }
        }
        Ok(())
    }

    /// Config file locations, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".").join(config::LOCAL_CONFIG_FILE)];
        if let Some(path) = Self::default_config_path() {
            paths.push(path);
        }
        #[cfg(unix)]
        paths.push(
            PathBuf::from("/etc")
                .join(config::CONFIG_DIR_NAME)
                .join(config::CONFIG_FILE_NAME),
        );
        paths
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        for path in Self::search_paths() {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Some(path);
            }
        }

        debug!("No config file found in standard locations");
        None
    }

    /// Default config file path for the current user
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(config::CONFIG_DIR_NAME)
                .join(config::CONFIG_FILE_NAME)
        })
    }

    /// Load configuration from a TOML file
    pub async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let config: AppConfig = toml::from_str(&content)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Write a commented default config file unless one already exists
    ///
    /// Returns whether a file was created.
    pub async fn write_default_file(path: &Path) -> ConfigResult<bool> {
        if path.exists() {
            return Ok(false);
        }

        info!("Creating default configuration file...");
        let write_error = |source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(write_error)?;
        }
        tokio::fs::write(path, Self::generate_default_config_content())
            .await
            .map_err(write_error)?;
        Ok(true)
    }

    /// Generate default configuration content with helpful comments
    pub fn generate_default_config_content() -> String {
        let prefetch = PrefetchConfig::default();
        format!(
            r#"# Image Cache Configuration
# You can customize any of these settings to suit your needs.

[cache]
# Create the cache directories at startup
enabled = true

# Cache directory (leave unset to use the system cache directory)
# cache_root = "/var/cache/image-cache"

# Where entry attributes are stored: auto, xattr, sidecar or memory
# auto uses extended attributes when the filesystem supports them
attribute_backend = "auto"

[prefetch]
# Sleep when the queue is empty, doubled on each consecutive idle poll
idle_sleep = "{}"
max_idle_sleep = "{}"

# Sleep after an unexpected error
error_sleep = "{}"

[logging]
# Logging configuration
level = "info"  # error, warn, info, debug, trace
"#,
            humantime_serde::re::humantime::format_duration(prefetch.idle_sleep),
            humantime_serde::re::humantime::format_duration(prefetch.max_idle_sleep),
            humantime_serde::re::humantime::format_duration(prefetch.error_sleep),
        )
    }
}

fn parse_flag(field: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "Expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_default_config_creation() {
        let config = AppConfig::default();

        assert!(config.cache.enabled);
        assert_eq!(config.cache.cache_root, None);
        assert_eq!(config.cache.attribute_backend, AttributeBackend::Auto);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_config_file_generation() {
        let content = AppConfig::generate_default_config_content();

        // Should be valid TOML that parses back to the defaults
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, AppConfig::default());
        assert!(content.contains("# Image Cache Configuration"));
        assert!(content.contains("[cache]"));
        assert!(content.contains("[prefetch]"));
    }

    #[tokio::test]
    async fn test_config_loading_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        // Should fail when explicitly specified
        let result = AppConfig::load(Some(config_path)).await;
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_config_loading_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let test_config = r#"
[cache]
cache_root = "/srv/images"
attribute_backend = "sidecar"

[prefetch]
idle_sleep = "2s"

[logging]
level = "debug"
"#;
        tokio::fs::write(&config_path, test_config).await.unwrap();

        let config = AppConfig::load_from_file(&config_path).await.unwrap();

        assert_eq!(config.cache.cache_root, Some(PathBuf::from("/srv/images")));
        assert_eq!(config.cache.attribute_backend, AttributeBackend::Sidecar);
        assert_eq!(config.prefetch.idle_sleep, Duration::from_secs(2));
        assert_eq!(config.logging.level, "debug");

        // Unspecified values keep their defaults
        assert!(config.cache.enabled);
        assert_eq!(
            config.prefetch.max_idle_sleep,
            PrefetchConfig::default().max_idle_sleep
        );
    }

    #[tokio::test]
    async fn test_invalid_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        tokio::fs::write(&config_path, "[cache\nenabled = yes")
            .await
            .unwrap();

        let result = AppConfig::load_from_file(&config_path).await;
        assert!(matches!(result, Err(ConfigError::InvalidFormat(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (config::ENV_ENABLED, "false"),
            (config::ENV_CACHE_DIR, "/mnt/cache"),
        ]
        .into_iter()
        .collect();

        let mut app_config = AppConfig::default();
        app_config
            .apply_env_overrides(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        assert!(!app_config.cache.enabled);
        assert_eq!(
            app_config.cache.cache_root,
            Some(PathBuf::from("/mnt/cache"))
        );
    }

    #[test]
    fn test_invalid_env_flag() {
        let mut app_config = AppConfig::default();
        let result = app_config.apply_env_overrides(|key| {
            (key == config::ENV_ENABLED).then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_write_default_file_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        assert!(AppConfig::write_default_file(&path).await.unwrap());
        assert!(!AppConfig::write_default_file(&path).await.unwrap());

        let loaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn test_runtime_conversion() {
        let mut app_config = AppConfig::default();
        app_config.cache.cache_root = Some(PathBuf::from("/data"));

        let (cache, prefetch) = app_config.to_runtime_config();
        assert!(cache.enabled);
        assert_eq!(cache.cache_root, Some(PathBuf::from("/data")));
        assert_eq!(prefetch, PrefetchConfig::default());
    }
}
