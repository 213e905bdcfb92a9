//! Core cache manager with atomic operations
//!
//! This module contains the [`ImageCache`] implementation: directory
//! initialization, the write/read session entry points, existence checks,
//! purging and introspection listings. The cache holds no in-process locks;
//! every cross-process transition is a rename between state directories.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info};

use crate::app::models::{ImageId, ImageMeta};
use crate::constants::{attributes, layout};
use crate::errors::{describe_chain, CacheError, CacheResult};

use super::attributes::{build_store, AttributeStore};
use super::config::CacheConfig;
use super::entries::{self, EntryStream};
use super::layout::{CacheDir, CacheLayout};
use super::session::{ReadSession, WriteSession};
use super::stats::CacheStats;

/// Main cache management system
#[derive(Clone)]
pub struct ImageCache {
    /// Configuration
    config: CacheConfig,
    /// Directory layout
    layout: CacheLayout,
    /// Entry attribute storage
    attributes: Arc<dyn AttributeStore>,
}

impl fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCache")
            .field("config", &self.config)
            .field("root", &self.layout.root())
            .field("attributes", &self.attributes.name())
            .finish()
    }
}

impl ImageCache {
    /// Create a new cache, creating its directories when enabled
    ///
    /// # Errors
    ///
    /// Returns `CacheError::DirectoryNotAccessible` if the cache directories
    /// cannot be created
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        let root = Self::resolve_root(&config)?;
        if config.enabled {
            Self::ensure_directories(&CacheLayout::new(&root)).await?;
        }
        let attributes = build_store(config.attribute_backend, &root);
        Ok(Self::assemble(config, root, attributes))
    }

    /// Create a cache with an explicit attribute store
    pub async fn with_attribute_store(
        config: CacheConfig,
        attributes: Arc<dyn AttributeStore>,
    ) -> CacheResult<Self> {
        let root = Self::resolve_root(&config)?;
        if config.enabled {
            Self::ensure_directories(&CacheLayout::new(&root)).await?;
        }
        Ok(Self::assemble(config, root, attributes))
    }

    fn assemble(config: CacheConfig, root: PathBuf, attributes: Arc<dyn AttributeStore>) -> Self {
        info!(
            "Initialized image cache with root: {} (enabled: {}, attributes: {})",
            root.display(),
            config.enabled,
            attributes.name()
        );
        Self {
            config,
            layout: CacheLayout::new(root),
            attributes,
        }
    }

    /// Configured root made absolute, or the OS cache directory
    fn resolve_root(config: &CacheConfig) -> CacheResult<PathBuf> {
        match &config.cache_root {
            Some(path) if path.is_relative() => std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .map_err(|source| CacheError::DirectoryNotAccessible {
                    path: path.clone(),
                    source,
                }),
            Some(path) => Ok(path.clone()),
            None => dirs::cache_dir()
                .map(|dir| dir.join(layout::DEFAULT_CACHE_DIR_NAME))
                .ok_or_else(|| CacheError::DirectoryNotAccessible {
                    path: PathBuf::from("system cache directory"),
                    source: io::Error::new(
                        io::ErrorKind::NotFound,
                        "no cache directory for this platform",
                    ),
                }),
        }
    }

    /// Create the auxiliary directories (and with them the root)
    ///
    /// Concurrent initializers may race; a directory that already exists is
    /// not an error.
    async fn ensure_directories(layout: &CacheLayout) -> CacheResult<()> {
        for which in CacheDir::AUXILIARY {
            let path = layout.dir(which);
            if path.is_dir() {
                continue;
            }
            info!("Image cache directory doesn't exist, creating '{}'", path.display());
            fs::create_dir_all(&path).await.map_err(|source| {
                error!("Failed to create cache directory {}: {}", path.display(), source);
                CacheError::DirectoryNotAccessible {
                    path: path.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }

    /// Whether the cache is enabled
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get the cache root directory
    pub fn cache_root(&self) -> &Path {
        self.layout.root()
    }

    /// Get the cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Directory layout
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Attribute store shared by all sessions
    pub fn attributes(&self) -> &Arc<dyn AttributeStore> {
        &self.attributes
    }

    /// Absolute path of `id` in one state directory
    pub fn path_for(&self, id: ImageId, which: CacheDir) -> PathBuf {
        self.layout.path_for(id, which)
    }

    /// True iff a committed entry exists for `id`
    pub fn hit(&self, id: ImageId) -> bool {
        self.path_for(id, CacheDir::Main).is_file()
    }

    /// True iff a write session for `id` is in progress (or was orphaned)
    pub fn is_being_written(&self, id: ImageId) -> bool {
        self.path_for(id, CacheDir::Tmp).exists()
    }

    /// Recorded hit count of a committed entry
    pub fn hits(&self, id: ImageId) -> Option<u64> {
        let path = self.path_for(id, CacheDir::Main);
        self.attributes
            .get_raw(&path, attributes::HITS)
            .ok()
            .flatten()
            .and_then(|value| value.trim().parse().ok())
    }

    /// Open a write session on `tmp/<id>`
    ///
    /// No locking happens here; callers must ensure a single writer per id.
    pub async fn open_write(&self, meta: ImageMeta) -> CacheResult<WriteSession> {
        WriteSession::open(&self.layout, self.attributes.clone(), meta).await
    }

    /// Open a read session on a committed entry
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotFound` if `id` is not cached
    pub async fn open_read(&self, id: ImageId) -> CacheResult<ReadSession> {
        ReadSession::open(&self.layout, self.attributes.clone(), id).await
    }

    /// Run `body` inside a write session, committing on `Ok` and rolling back on `Err`
    ///
    /// The error returned by `body` reaches the caller unchanged after the
    /// rollback. Cache failures while opening or committing are converted
    /// with `From<CacheError>`.
    pub async fn write_with<T, E, F>(&self, meta: ImageMeta, body: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut WriteSession) -> BoxFuture<'a, Result<T, E>>,
        E: From<CacheError> + fmt::Display,
    {
        let id = meta.id;
        let mut session = self.open_write(meta).await?;

        match body(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_error) = session.rollback(&err).await {
                    error!("Rollback of image {} failed: {}", id, rollback_error);
                }
                Err(err)
            }
        }
    }

    /// Stream `reader` into the cache as `meta`
    ///
    /// Returns the number of bytes cached. A read failure rolls the entry back
    /// and is reported as `CacheError::WriteFailure`.
    pub async fn write_from<R>(&self, meta: ImageMeta, reader: R) -> CacheResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let id = meta.id;
        let mut reader = reader;
        let mut session = self.open_write(meta).await?;

        match tokio::io::copy(&mut reader, &mut session).await {
            Ok(bytes) => {
                session.commit().await?;
                Ok(bytes)
            }
            Err(source) => {
                let err = CacheError::WriteFailure { id, source };
                if let Err(rollback_error) = session.rollback(&describe_chain(&err)).await {
                    error!("Rollback of image {} failed: {}", id, rollback_error);
                }
                Err(err)
            }
        }
    }

    /// Read a committed entry fully, counting one hit
    pub async fn read_all(&self, id: ImageId) -> CacheResult<Vec<u8>> {
        let mut session = self.open_read(id).await?;
        let mut content = Vec::new();
        session.read_to_end(&mut content).await?;
        session.close().await;
        Ok(content)
    }

    /// Delete a file and its attributes; absent files are not an error
    async fn delete_file(&self, path: &Path) -> CacheResult<bool> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!("Deleting image cache file '{}'", path.display());
                if let Err(e) = self.attributes.remove_all(path) {
                    debug!("Failed to drop attributes of {}: {}", path.display(), e);
                }
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Remove the committed entry for `id`; a no-op if it is not cached
    pub async fn purge(&self, id: ImageId) -> CacheResult<()> {
        let path = self.path_for(id, CacheDir::Main);
        self.delete_file(&path).await?;
        Ok(())
    }

    /// Remove every file in the cache root and in `invalid/`
    ///
    /// `tmp/` holds active writes and is never touched, nor are the prefetch
    /// directories. Not transactional: an interruption leaves some entries.
    pub async fn purge_all(&self) -> CacheResult<usize> {
        let mut removed = 0;
        for which in [CacheDir::Main, CacheDir::Invalid] {
            removed += self.delete_regular_files(&self.layout.dir(which)).await?;
        }
        info!("Purged {} cache entries", removed);
        Ok(removed)
    }

    /// Returns the number of image entries deleted
    async fn delete_regular_files(&self, dir: &Path) -> CacheResult<usize> {
        let mut read_dir = match fs::read_dir(dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let mut removed = 0;
        while let Some(entry) = read_dir.next_entry().await? {
            let is_file = match entry.file_type().await {
                Ok(file_type) => file_type.is_file(),
                Err(_) => continue,
            };
            if !is_file {
                continue;
            }
            let is_entry = entry
                .file_name()
                .to_str()
                .and_then(ImageId::from_file_name)
                .is_some();
            if self.delete_file(&entry.path()).await? && is_entry {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Committed entries
    pub fn entries(&self) -> EntryStream {
        entries::active(self.layout.dir(CacheDir::Main), self.attributes.clone())
    }

    /// Rolled-back entries
    pub fn invalid_entries(&self) -> EntryStream {
        entries::invalid(self.layout.dir(CacheDir::Invalid), self.attributes.clone())
    }

    /// Queued and in-progress prefetch requests
    pub fn prefetch_entries(&self) -> EntryStream {
        entries::prefetch(
            self.layout.dir(CacheDir::Prefetch),
            self.layout.dir(CacheDir::Prefetching),
            self.attributes.clone(),
        )
    }

    /// Get cache statistics
    pub async fn get_cache_stats(&self) -> CacheStats {
        let mut stats = CacheStats::new(self.cache_root().to_path_buf());

        let mut active = self.entries();
        while let Some(entry) = active.next().await {
            stats.record_active(entry.size);
        }
        let mut invalid = self.invalid_entries();
        while let Some(entry) = invalid.next().await {
            stats.record_invalid(entry.size);
        }
        let mut in_flight = entries::entry_files(self.layout.dir(CacheDir::Tmp)).boxed();
        while let Some(file) = in_flight.next().await {
            stats.record_in_flight(file.metadata.len());
        }
        let mut prefetch = self.prefetch_entries();
        while let Some(entry) = prefetch.next().await {
            if let Some(status) = entry.status() {
                stats.record_prefetch(status);
            }
        }
        stats
    }
}
