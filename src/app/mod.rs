//! Core application logic for the image cache
//!
//! This module contains the cache with its sessions and listings, the
//! prefetch queue and worker, and the shared data models.
//!
//! # Examples
//!
//! ```rust,no_run
//! use image_cache::app::{CacheConfig, ImageCache, ImageId, ImageMeta, PrefetchQueue};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ImageCache::new(CacheConfig::default().with_enabled(true)).await?;
//! let queue = PrefetchQueue::new(cache.clone());
//!
//! let meta = ImageMeta::new(ImageId::new(7), "debian-12");
//! if let Err(e) = queue.enqueue(&meta).await {
//!     if !e.is_conflict() {
//!         return Err(e.into());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod models;
pub mod prefetch;

// Re-export main public API
pub use cache::{CacheConfig, CacheEntry, CacheStats, EntryKind, ImageCache};
pub use models::{ImageId, ImageMeta, PrefetchState, PrefetchStatus};
pub use prefetch::{PrefetchConfig, PrefetchQueue, Prefetcher};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_structure() {
        // Ensure public API is accessible
        let config = CacheConfig::default();
        assert!(!config.enabled);
        assert_eq!(PrefetchConfig::default(), PrefetchConfig::default());
    }
}
