//! Directory-backed FIFO prefetch queue
//!
//! A request is a zero-byte marker named by image id. Its state is the
//! directory holding it: `prefetch/` while queued, `prefetching/` once a
//! worker claimed it. Queue order is the marker's modification time, so the
//! queue survives restarts and is shared by every process using the root.
//!
//! Prefetches are serialized by convention only: a worker checks
//! [`PrefetchQueue::is_any_prefetching`] before promoting, but two workers
//! that check at the same moment may both proceed.

use std::io;

use futures::StreamExt;
use tokio::fs::{self, OpenOptions};
use tracing::{debug, info, warn};

use crate::app::cache::entries;
use crate::app::cache::{CacheDir, ImageCache};
use crate::app::models::{ImageId, ImageMeta, PrefetchState};
use crate::constants::attributes;
use crate::errors::{PrefetchError, PrefetchResult};

/// Prefetch queue over one cache root
#[derive(Debug, Clone)]
pub struct PrefetchQueue {
    cache: ImageCache,
}

impl PrefetchQueue {
    /// Create a queue sharing `cache`'s root and attribute store
    pub fn new(cache: ImageCache) -> Self {
        Self { cache }
    }

    /// Underlying cache
    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Current state of the request for `id`
    pub fn state(&self, id: ImageId) -> PrefetchState {
        if self.cache.path_for(id, CacheDir::Prefetching).exists() {
            PrefetchState::Prefetching
        } else if self.cache.path_for(id, CacheDir::Prefetch).exists() {
            PrefetchState::Queued
        } else {
            PrefetchState::Absent
        }
    }

    /// Queue `meta` for prefetching
    ///
    /// # Errors
    ///
    /// Rejects the request with `AlreadyCached`, `AlreadyPrefetching` or
    /// `AlreadyQueued` without changing any state.
    pub async fn enqueue(&self, meta: &ImageMeta) -> PrefetchResult<()> {
        let id = meta.id;
        let rejection = if self.cache.hit(id) {
            Some(PrefetchError::AlreadyCached { id })
        } else {
            match self.state(id) {
                PrefetchState::Prefetching => Some(PrefetchError::AlreadyPrefetching { id }),
                PrefetchState::Queued => Some(PrefetchError::AlreadyQueued { id }),
                PrefetchState::Absent => None,
            }
        };
        if let Some(rejection) = rejection {
            warn!("{}", rejection);
            return Err(rejection);
        }

        let marker = self.cache.path_for(id, CacheDir::Prefetch);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let rejection = PrefetchError::AlreadyQueued { id };
                warn!("{}", rejection);
                return Err(rejection);
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self
            .cache
            .attributes()
            .set(&marker, attributes::IMAGE_NAME, &meta.name)
        {
            if let Err(cleanup) = fs::remove_file(&marker).await {
                debug!("Failed to remove marker {}: {}", marker.display(), cleanup);
            }
            return Err(e.into());
        }

        info!("Queued image {} ({}) for prefetching", id, meta.name);
        Ok(())
    }

    /// Oldest queued request, left in place
    ///
    /// # Errors
    ///
    /// Returns `PrefetchError::Empty` when nothing is queued
    pub async fn dequeue_next(&self) -> PrefetchResult<ImageId> {
        let mut markers = entries::entry_files(self.cache.layout().dir(CacheDir::Prefetch)).boxed();
        let mut oldest = None;
        while let Some(file) = markers.next().await {
            let modified = file.modified();
            match oldest {
                Some((_, time)) if time <= modified => {}
                _ => oldest = Some((file.id, modified)),
            }
        }
        oldest.map(|(id, _)| id).ok_or(PrefetchError::Empty)
    }

    /// Move a queued request to `prefetching/`
    ///
    /// # Errors
    ///
    /// Returns `PrefetchError::NotQueued` if the marker was cancelled or
    /// claimed by someone else in the meantime
    pub async fn promote(&self, id: ImageId) -> PrefetchResult<()> {
        let queued = self.cache.path_for(id, CacheDir::Prefetch);
        let claimed = self.cache.path_for(id, CacheDir::Prefetching);

        debug!(
            "Promoting prefetch request by moving '{}' to '{}'",
            queued.display(),
            claimed.display()
        );
        match fs::rename(&queued, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PrefetchError::NotQueued { id });
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.cache.attributes().relocate(&queued, &claimed) {
            warn!("Failed to move attributes of prefetch request {}: {}", id, e);
        }
        Ok(())
    }

    /// Take the oldest queued request and promote it
    ///
    /// Requests that vanish between listing and promotion are skipped.
    pub async fn claim(&self) -> PrefetchResult<ImageMeta> {
        loop {
            let id = self.dequeue_next().await?;
            match self.promote(id).await {
                Ok(()) => {
                    let name = self
                        .prefetching_name(id)
                        .unwrap_or_else(|| attributes::UNKNOWN.to_string());
                    return Ok(ImageMeta::new(id, name));
                }
                Err(PrefetchError::NotQueued { id }) => {
                    debug!("Prefetch request {} vanished before promotion", id);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Finish an in-progress request; a missing marker is not an error
    pub async fn release(&self, id: ImageId) -> PrefetchResult<()> {
        self.remove_marker(id, CacheDir::Prefetching).await
    }

    /// Drop a queued request; a missing marker is not an error
    pub async fn cancel(&self, id: ImageId) -> PrefetchResult<()> {
        self.remove_marker(id, CacheDir::Prefetch).await
    }

    async fn remove_marker(&self, id: ImageId, which: CacheDir) -> PrefetchResult<()> {
        let marker = self.cache.path_for(id, which);
        match fs::remove_file(&marker).await {
            Ok(()) => {
                debug!("Removed prefetch marker '{}'", marker.display());
                if let Err(e) = self.cache.attributes().remove_all(&marker) {
                    debug!("Failed to drop attributes of {}: {}", marker.display(), e);
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// True iff some request is in progress
    pub async fn is_any_prefetching(&self) -> bool {
        entries::entry_files(self.cache.layout().dir(CacheDir::Prefetching))
            .boxed()
            .next()
            .await
            .is_some()
    }

    /// Image name recorded on a queued request
    pub fn queued_name(&self, id: ImageId) -> Option<String> {
        self.marker_name(id, CacheDir::Prefetch)
    }

    /// Image name recorded on an in-progress request
    pub fn prefetching_name(&self, id: ImageId) -> Option<String> {
        self.marker_name(id, CacheDir::Prefetching)
    }

    fn marker_name(&self, id: ImageId, which: CacheDir) -> Option<String> {
        let marker = self.cache.path_for(id, which);
        if !marker.exists() {
            return None;
        }
        self.cache
            .attributes()
            .get_raw(&marker, attributes::IMAGE_NAME)
            .ok()
            .flatten()
    }
}
