//! Error types for the image cache
//!
//! This module defines the error types for all components of the cache. Enqueue
//! conflicts and an empty queue are expected outcomes and are kept apart from
//! filesystem failures so callers can tell them apart.

use std::path::PathBuf;

use thiserror::Error;

use crate::app::models::ImageId;

/// Cache storage errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Read of an image that has no committed entry
    #[error("Image {id} is not cached")]
    NotFound { id: ImageId },

    /// Writing image data failed; the partial entry was moved to `invalid`
    #[error("Failed to write image {id} into the cache")]
    WriteFailure {
        id: ImageId,
        #[source]
        source: std::io::Error,
    },

    /// Cache directory could not be created or accessed
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Attribute read or write failed
    #[error("Attribute '{key}' unavailable for {path}")]
    Attribute {
        path: PathBuf,
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Sidecar attribute file is not valid JSON
    #[error("Corrupted sidecar attribute file: {path}")]
    Sidecar {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Prefetch queue errors
#[derive(Error, Debug)]
pub enum PrefetchError {
    /// Image is already in the cache
    #[error("Skipping prefetch, image {id} already cached")]
    AlreadyCached { id: ImageId },

    /// Image is already queued for prefetching
    #[error("Skipping prefetch, image {id} already queued for prefetching")]
    AlreadyQueued { id: ImageId },

    /// Image is currently being prefetched
    #[error("Skipping prefetch, already prefetching image {id}")]
    AlreadyPrefetching { id: ImageId },

    /// No queued prefetch work
    #[error("Prefetch queue is empty")]
    Empty,

    /// Promotion found no queued marker to claim
    #[error("Image {id} is not queued for prefetching")]
    NotQueued { id: ImageId },

    /// Origin source could not supply image data
    #[error("Failed to fetch image {id} from source")]
    Source {
        id: ImageId,
        #[source]
        source: std::io::Error,
    },

    /// Underlying cache error
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl PrefetchError {
    /// True for enqueue rejections that leave the queue unchanged
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PrefetchError::AlreadyCached { .. }
                | PrefetchError::AlreadyQueued { .. }
                | PrefetchError::AlreadyPrefetching { .. }
        )
    }
}

/// Error text followed by each underlying cause
///
/// Used where only a string survives, such as the `error` attribute of an
/// invalid entry.
pub fn describe_chain(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut cause = error.source();
    while let Some(inner) = cause {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        cause = inner.source();
    }
    text
}

impl From<std::io::Error> for PrefetchError {
    fn from(error: std::io::Error) -> Self {
        PrefetchError::Cache(CacheError::Io(error))
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read or written
    #[error("Failed to access configuration file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Prefetch error
    #[error(transparent)]
    Prefetch(#[from] PrefetchError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient or an expected rejection)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Prefetch(e) if e.is_conflict() => true,
            AppError::Prefetch(PrefetchError::Empty)
            | AppError::Prefetch(PrefetchError::NotQueued { .. })
            | AppError::Prefetch(PrefetchError::Source { .. })
            | AppError::Cache(CacheError::NotFound { .. })
            | AppError::Cache(CacheError::WriteFailure { .. }) => true,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Cache(_) => "cache",
            AppError::Prefetch(_) => "prefetch",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Prefetch result type alias
pub type PrefetchResult<T> = std::result::Result<T, PrefetchError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
