//! Origin sources for prefetched images
//!
//! The prefetcher only needs a byte stream per image. The real origin store
//! client lives outside this crate and plugs in through [`ImageSource`];
//! [`DirectorySource`] serves images from a local directory laid out like
//! the cache root.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::app::models::ImageMeta;

/// Byte stream of one image
pub type ImageStream = Box<dyn AsyncRead + Send + Unpin>;

/// Capability to fetch image bytes from the origin store
pub trait ImageSource: Send + Sync + fmt::Debug {
    /// Open a stream over the image described by `meta`
    fn fetch<'a>(&'a self, meta: &'a ImageMeta) -> BoxFuture<'a, io::Result<ImageStream>>;
}

/// Images stored as `<root>/<id>`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Serve images from `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory images are read from
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ImageSource for DirectorySource {
    fn fetch<'a>(&'a self, meta: &'a ImageMeta) -> BoxFuture<'a, io::Result<ImageStream>> {
        Box::pin(async move {
            let path = self.root.join(meta.id.file_name());
            debug!("Fetching image {} from {}", meta.id, path.display());
            let file = File::open(&path).await?;
            Ok(Box::new(file) as ImageStream)
        })
    }
}
