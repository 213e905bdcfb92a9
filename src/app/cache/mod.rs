//! Disk-backed read-through image cache
//!
//! Entries live as plain files named by image id. Their lifecycle is encoded
//! entirely in which directory holds the file:
//!
//! - `<root>/<id>` - committed, readable entry
//! - `<root>/tmp/<id>` - entry being written
//! - `<root>/invalid/<id>` - entry whose write failed
//! - `<root>/prefetch/<id>`, `<root>/prefetching/<id>` - prefetch markers
//!
//! Moving between states is always a rename within one filesystem, so the
//! state of an id can be observed by any process sharing the root. Metadata
//! such as the image name, hit count and failure reason is kept out of band
//! in an [`AttributeStore`].
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and defaults
//! - [`layout`] - Directory layout and path mapping
//! - [`attributes`] - Attribute store backends
//! - [`session`] - Write and read sessions
//! - [`entries`] - Introspection listings
//! - [`stats`] - Cache statistics
//! - [`manager`] - Cache handle tying the pieces together
//!
//! # Examples
//!
//! ```rust,no_run
//! use image_cache::app::cache::{CacheConfig, ImageCache};
//! use image_cache::app::models::{ImageId, ImageMeta};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ImageCache::new(CacheConfig::with_cache_root("/var/cache/images".into())).await?;
//!
//! let id = ImageId::new(42);
//! if !cache.hit(id) {
//!     let origin = tokio::fs::File::open("/srv/origin/42").await?;
//!     cache.write_from(ImageMeta::new(id, "ubuntu-24.04"), origin).await?;
//! }
//! let data = cache.read_all(id).await?;
//! println!("{} bytes, {:?} hits", data.len(), cache.hits(id));
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod config;
pub mod entries;
pub mod layout;
pub mod manager;
pub mod session;
pub mod stats;

#[cfg(test)]
pub mod tests;

// Re-export main public API
pub use attributes::{build_store, AttributeStore, MemoryStore, SidecarStore, XattrStore};
pub use config::{AttributeBackend, CacheConfig};
pub use entries::{CacheEntry, EntryKind, EntryStream};
pub use layout::{CacheDir, CacheLayout};
pub use manager::ImageCache;
pub use session::{ReadSession, WriteSession};
pub use stats::{format_bytes, CacheStats};
