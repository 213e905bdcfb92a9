//! Cache directory layout
//!
//! Every image uses its identifier as the filename in each state directory:
//!
//! ```text
//! <root>/<id>               committed entries
//! <root>/tmp/<id>           in-progress writes
//! <root>/invalid/<id>       rolled-back writes
//! <root>/prefetch/<id>      queued prefetch requests
//! <root>/prefetching/<id>   in-flight prefetch requests
//! ```
//!
//! All directories share one filesystem so every state transition is a
//! single atomic rename.

use std::path::{Path, PathBuf};

use crate::app::models::ImageId;
use crate::constants::layout;

/// State directory selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDir {
    /// Committed entries (the cache root itself)
    Main,
    /// In-progress writes
    Tmp,
    /// Rolled-back writes
    Invalid,
    /// Queued prefetch requests
    Prefetch,
    /// In-flight prefetch requests
    Prefetching,
}

impl CacheDir {
    /// Directories created at initialization; creating `tmp` also creates the root
    pub const AUXILIARY: [CacheDir; 4] = [
        CacheDir::Tmp,
        CacheDir::Invalid,
        CacheDir::Prefetch,
        CacheDir::Prefetching,
    ];

    /// Subdirectory name relative to the root (`None` for the root)
    pub fn subdirectory(&self) -> Option<&'static str> {
        match self {
            CacheDir::Main => None,
            CacheDir::Tmp => Some(layout::TMP_DIR),
            CacheDir::Invalid => Some(layout::INVALID_DIR),
            CacheDir::Prefetch => Some(layout::PREFETCH_DIR),
            CacheDir::Prefetching => Some(layout::PREFETCHING_DIR),
        }
    }
}

/// Path mapping for one cache root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Create a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory (also the directory of committed entries)
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a state directory
    pub fn dir(&self, which: CacheDir) -> PathBuf {
        match which.subdirectory() {
            Some(name) => self.root.join(name),
            None => self.root.clone(),
        }
    }

    /// Absolute path of `id` inside a state directory
    pub fn path_for(&self, id: ImageId, which: CacheDir) -> PathBuf {
        self.dir(which).join(id.file_name())
    }
}
