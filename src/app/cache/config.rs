//! Cache configuration types and defaults
//!
//! This module contains the configuration structures for the cache system,
//! including the attribute backend selection.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where entry attributes are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttributeBackend {
    /// Use extended attributes when the cache filesystem supports them, else sidecar files
    #[default]
    Auto,
    /// Filesystem extended attributes
    Xattr,
    /// JSON sidecar files next to each entry
    Sidecar,
    /// Process-local map (tests and throwaway caches)
    Memory,
}

impl fmt::Display for AttributeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeBackend::Auto => "auto",
            AttributeBackend::Xattr => "xattr",
            AttributeBackend::Sidecar => "sidecar",
            AttributeBackend::Memory => "memory",
        };
        f.write_str(name)
    }
}

impl FromStr for AttributeBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(AttributeBackend::Auto),
            "xattr" => Ok(AttributeBackend::Xattr),
            "sidecar" => Ok(AttributeBackend::Sidecar),
            "memory" => Ok(AttributeBackend::Memory),
            other => Err(format!(
                "unknown attribute backend '{}', expected auto, xattr, sidecar or memory",
                other
            )),
        }
    }
}

/// Configuration for the cache management system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the cache is in use; when false, directories are not created at startup
    pub enabled: bool,
    /// Root directory for cache storage (OS-specific if None)
    pub cache_root: Option<PathBuf>,
    /// Attribute storage backend
    pub attribute_backend: AttributeBackend,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_root: None, // Will use OS-specific cache directory
            attribute_backend: AttributeBackend::Auto,
        }
    }
}

impl CacheConfig {
    /// Create an enabled cache configuration with a custom cache root
    pub fn with_cache_root(cache_root: PathBuf) -> Self {
        Self {
            enabled: true,
            cache_root: Some(cache_root),
            ..Default::default()
        }
    }

    /// Enable or disable the cache
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Select the attribute backend
    pub fn with_attribute_backend(mut self, backend: AttributeBackend) -> Self {
        self.attribute_backend = backend;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.cache_root, None);
        assert_eq!(config.attribute_backend, AttributeBackend::Auto);
    }

    #[test]
    fn test_config_builder() {
        let cache_root = PathBuf::from("/tmp/test");
        let config = CacheConfig::with_cache_root(cache_root.clone())
            .with_attribute_backend(AttributeBackend::Sidecar)
            .with_enabled(false);

        assert_eq!(config.cache_root, Some(cache_root));
        assert_eq!(config.attribute_backend, AttributeBackend::Sidecar);
        assert!(!config.enabled);
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("XATTR".parse::<AttributeBackend>(), Ok(AttributeBackend::Xattr));
        assert_eq!(
            "sidecar".parse::<AttributeBackend>(),
            Ok(AttributeBackend::Sidecar)
        );
        assert!("redis".parse::<AttributeBackend>().is_err());
        assert_eq!(AttributeBackend::Memory.to_string(), "memory");
    }
}
