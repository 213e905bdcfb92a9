//! Image Cache Library
//!
//! A read-through disk cache for large immutable images. Entries are written
//! through sessions that publish atomically on commit and move aside on
//! failure, reads are counted per entry, and a directory-backed FIFO queue
//! drives prefetching.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use constants::*;
    use constants::config;

    #[test]
    fn test_constants_accessible() {
        assert_eq!(layout::TMP_DIR, "tmp");
        assert_eq!(attributes::UNKNOWN, "UNKNOWN");
        assert!(config::ENV_CACHE_DIR.starts_with("IMAGE_CACHE"));
    }

    #[test]
    fn test_error_types() {
        let prefetch_error = errors::PrefetchError::Empty;
        let app_error = AppError::Prefetch(prefetch_error);

        assert_eq!(app_error.category(), "prefetch");
        assert!(app_error.is_recoverable());
    }
}
