//! Cache introspection
//!
//! Listings merge filesystem facts (id from the filename, path, size, last
//! access) with attribute data. Each listing is a lazy single-pass stream over
//! one directory; restarting it means listing again. Filenames that are not
//! image identifiers are skipped, as are files that disappear between the
//! directory read and the stat.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use tokio::fs::{self, ReadDir};
use tracing::{debug, warn};

use crate::app::models::{ImageId, PrefetchStatus};
use crate::constants::attributes;

use super::attributes::AttributeStore;

/// Stream of entry descriptors
pub type EntryStream = BoxStream<'static, CacheEntry>;

/// Variant-specific entry fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    /// Committed entry in the cache root
    Active {
        /// Recorded reads, `None` when the attribute is missing or unreadable
        hits: Option<u64>,
    },
    /// Rolled-back entry in `invalid/`
    Invalid {
        /// Failure that caused the rollback
        error: String,
    },
    /// Prefetch request marker
    Prefetch {
        /// Which prefetch directory held the marker
        status: PrefetchStatus,
    },
}

/// Descriptor of one file in a cache directory
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    /// Image identifier parsed from the filename
    pub id: ImageId,
    /// Absolute path of the file
    pub path: PathBuf,
    /// `image_name` attribute
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Last access time, falling back to modification time
    pub last_accessed: DateTime<Utc>,
    /// Variant-specific fields
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl CacheEntry {
    /// Hit count of an active entry
    pub fn hits(&self) -> Option<u64> {
        match self.kind {
            EntryKind::Active { hits } => hits,
            _ => None,
        }
    }

    /// Failure description of an invalid entry
    pub fn error(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Invalid { error } => Some(error),
            _ => None,
        }
    }

    /// Status of a prefetch entry
    pub fn status(&self) -> Option<PrefetchStatus> {
        match self.kind {
            EntryKind::Prefetch { status } => Some(status),
            _ => None,
        }
    }
}

/// Regular file in a cache directory whose name is an image identifier
#[derive(Debug)]
pub(crate) struct EntryFile {
    pub id: ImageId,
    pub path: PathBuf,
    pub metadata: Metadata,
}

impl EntryFile {
    /// Modification time, used as the enqueue timestamp of prefetch markers
    pub fn modified(&self) -> SystemTime {
        self.metadata.modified().unwrap_or(UNIX_EPOCH)
    }

    /// Access time, or modification time when atime is unavailable or zero
    pub fn last_accessed(&self) -> DateTime<Utc> {
        let accessed = self
            .metadata
            .accessed()
            .ok()
            .filter(|time| *time > UNIX_EPOCH)
            .unwrap_or_else(|| self.modified());
        DateTime::<Utc>::from(accessed)
    }
}

enum Listing {
    Pending(PathBuf),
    Reading(ReadDir),
}

/// Lazily list entry files of one directory
pub(crate) fn entry_files(dir: PathBuf) -> impl Stream<Item = EntryFile> + Send + 'static {
    stream::unfold(Listing::Pending(dir), |listing| async move {
        let mut read_dir = match listing {
            Listing::Pending(dir) => match fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(e) => {
                    warn!("Cannot list cache directory {}: {}", dir.display(), e);
                    return None;
                }
            },
            Listing::Reading(read_dir) => read_dir,
        };

        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => return None,
                Err(e) => {
                    warn!("Cache directory listing interrupted: {}", e);
                    return None;
                }
            };

            let file_name = entry.file_name();
            let Some(id) = file_name.to_str().and_then(ImageId::from_file_name) else {
                continue;
            };

            match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => {
                    let file = EntryFile {
                        id,
                        path: entry.path(),
                        metadata,
                    };
                    return Some((file, Listing::Reading(read_dir)));
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping vanished cache file {}: {}", entry.path().display(), e);
                    continue;
                }
            }
        }
    })
}

fn describe<F>(dir: PathBuf, attributes: Arc<dyn AttributeStore>, kind: F) -> EntryStream
where
    F: Fn(&dyn AttributeStore, &Path) -> EntryKind + Send + 'static,
{
    entry_files(dir)
        .map(move |file| {
            let store = attributes.as_ref();
            CacheEntry {
                id: file.id,
                name: store.get(&file.path, attributes::IMAGE_NAME, attributes::UNKNOWN),
                size: file.metadata.len(),
                last_accessed: file.last_accessed(),
                kind: kind(store, &file.path),
                path: file.path,
            }
        })
        .boxed()
}

/// Committed entries with their hit counts
pub(crate) fn active(dir: PathBuf, attributes: Arc<dyn AttributeStore>) -> EntryStream {
    describe(dir, attributes, |store, path| EntryKind::Active {
        hits: store
            .get_raw(path, attributes::HITS)
            .ok()
            .flatten()
            .and_then(|value| value.trim().parse().ok()),
    })
}

/// Rolled-back entries with their failure descriptions
pub(crate) fn invalid(dir: PathBuf, attributes: Arc<dyn AttributeStore>) -> EntryStream {
    describe(dir, attributes, |store, path| EntryKind::Invalid {
        error: store.get(path, attributes::ERROR, attributes::UNKNOWN),
    })
}

/// Queued markers followed by in-progress markers
pub(crate) fn prefetch(
    queued_dir: PathBuf,
    prefetching_dir: PathBuf,
    attributes: Arc<dyn AttributeStore>,
) -> EntryStream {
    let queued = describe(queued_dir, attributes.clone(), |_, _| EntryKind::Prefetch {
        status: PrefetchStatus::Queued,
    });
    let in_progress = describe(prefetching_dir, attributes, |_, _| EntryKind::Prefetch {
        status: PrefetchStatus::InProgress,
    });
    queued.chain(in_progress).boxed()
}
