//! Application constants for the image cache
//!
//! This module centralizes the on-disk names and defaults used throughout
//! the cache, organized by functional domain.

use std::time::Duration;

/// Cache directory layout
pub mod layout {
    /// In-progress writes
    pub const TMP_DIR: &str = "tmp";

    /// Rolled-back writes
    pub const INVALID_DIR: &str = "invalid";

    /// Queued prefetch requests
    pub const PREFETCH_DIR: &str = "prefetch";

    /// In-flight prefetch requests
    pub const PREFETCHING_DIR: &str = "prefetching";

    /// Directory name appended to the OS cache directory when no root is configured
    pub const DEFAULT_CACHE_DIR_NAME: &str = "image-cache";
}

/// Attribute keys and defaults
pub mod attributes {
    /// Human readable image name
    pub const IMAGE_NAME: &str = "image_name";

    /// Read counter on committed entries
    pub const HITS: &str = "hits";

    /// Failure description on invalid entries
    pub const ERROR: &str = "error";

    /// Reported when an attribute is missing
    pub const UNKNOWN: &str = "UNKNOWN";

    /// Namespace prefix for extended attribute names
    pub const XATTR_PREFIX: &str = "user.image_cache.";

    /// Prefix of sidecar attribute files
    pub const SIDECAR_PREFIX: &str = ".";

    /// Suffix of sidecar attribute files
    pub const SIDECAR_SUFFIX: &str = ".attrs";

    /// Suffix of sidecar files while they are being rewritten
    pub const SIDECAR_TEMP_SUFFIX: &str = ".tmp";

    /// Probe file used to check extended attribute support
    pub const XATTR_PROBE_FILE: &str = ".xattr_probe";
}

/// Prefetch worker defaults
pub mod prefetch {
    use super::Duration;

    /// Base sleep when the queue is empty
    pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(500);

    /// Upper bound for idle backoff
    pub const DEFAULT_MAX_IDLE_SLEEP: Duration = Duration::from_secs(30);

    /// Sleep after an unexpected worker error
    pub const DEFAULT_ERROR_SLEEP: Duration = Duration::from_secs(1);

    /// Maximum doubling steps applied to the idle sleep
    pub const MAX_BACKOFF_SHIFT: u32 = 6;
}

/// Rollback messages
pub mod session {
    /// Error recorded when a write session is dropped without being finalized
    pub const DROPPED_BEFORE_COMMIT: &str = "write session dropped before commit";
}

/// Configuration file names and environment variables
pub mod config {
    /// Project-local config file
    pub const LOCAL_CONFIG_FILE: &str = "image-cache.toml";

    /// Directory under the user config dir
    pub const CONFIG_DIR_NAME: &str = "image-cache";

    /// Config file name inside the config dir
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// Overrides `[cache].enabled`
    pub const ENV_ENABLED: &str = "IMAGE_CACHE_ENABLED";

    /// Overrides `[cache].cache_root`
    pub const ENV_CACHE_DIR: &str = "IMAGE_CACHE_DIR";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_names_never_parse_as_ids() {
        let sidecar = format!(
            "{}42{}",
            attributes::SIDECAR_PREFIX,
            attributes::SIDECAR_SUFFIX
        );
        assert!(crate::app::models::ImageId::from_file_name(&sidecar).is_none());
        assert!(prefetch::DEFAULT_IDLE_SLEEP < prefetch::DEFAULT_MAX_IDLE_SLEEP);
    }
}
