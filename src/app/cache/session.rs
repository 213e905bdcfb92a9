//! Scoped write and read access to a single cache entry
//!
//! A [`WriteSession`] writes into `tmp/<id>` and finishes in exactly one of
//! two ways: `commit` publishes the file to the cache root, `rollback` moves it
//! to `invalid/`. The rename is the only publish point, so a committed entry is
//! never visible half-written. A session dropped without either runs the
//! rollback itself.
//!
//! A [`ReadSession`] reads a committed entry and bumps its `hits` attribute
//! when closed normally.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, error, warn};

use crate::app::models::{ImageId, ImageMeta};
use crate::constants::{attributes, session};
use crate::errors::{CacheError, CacheResult};

use super::attributes::AttributeStore;
use super::layout::{CacheDir, CacheLayout};

/// Writable handle on an in-progress cache entry
pub struct WriteSession {
    meta: ImageMeta,
    tmp_path: PathBuf,
    final_path: PathBuf,
    invalid_path: PathBuf,
    file: Option<File>,
    attributes: Arc<dyn AttributeStore>,
    bytes_written: u64,
    finished: bool,
}

impl fmt::Debug for WriteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSession")
            .field("meta", &self.meta)
            .field("tmp_path", &self.tmp_path)
            .field("bytes_written", &self.bytes_written)
            .field("finished", &self.finished)
            .finish()
    }
}

impl WriteSession {
    /// Create or truncate `tmp/<id>` and bind a session to it
    pub(crate) async fn open(
        layout: &CacheLayout,
        attributes: Arc<dyn AttributeStore>,
        meta: ImageMeta,
    ) -> CacheResult<Self> {
        let tmp_path = layout.path_for(meta.id, CacheDir::Tmp);
        let file = File::create(&tmp_path).await.map_err(|e| {
            error!("Failed to open cache write path {}: {}", tmp_path.display(), e);
            CacheError::Io(e)
        })?;

        debug!("Opened write session for image {} at {}", meta.id, tmp_path.display());

        Ok(Self {
            final_path: layout.path_for(meta.id, CacheDir::Main),
            invalid_path: layout.path_for(meta.id, CacheDir::Invalid),
            tmp_path,
            meta,
            file: Some(file),
            attributes,
            bytes_written: 0,
            finished: false,
        })
    }

    /// Image being written
    pub fn id(&self) -> ImageId {
        self.meta.id
    }

    /// Metadata recorded on the entry when the session finishes
    pub fn meta(&self) -> &ImageMeta {
        &self.meta
    }

    /// Temporary path receiving the bytes
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Publish the entry: attach `image_name` and `hits=0`, then rename into the cache root
    ///
    /// Any failure before the rename rolls the entry back to `invalid/` and is
    /// returned to the caller.
    pub async fn commit(mut self) -> CacheResult<PathBuf> {
        self.finished = true;

        if let Err(e) = self.close_file().await {
            error!("Failed to flush cache entry for image {}: {}", self.meta.id, e);
            self.discard_to_invalid(&e.to_string()).await;
            return Err(CacheError::WriteFailure {
                id: self.meta.id,
                source: e,
            });
        }

        if let Err(e) = self.write_commit_attributes() {
            error!("Failed to attach attributes to image {}: {}", self.meta.id, e);
            self.discard_to_invalid(&e.to_string()).await;
            return Err(e);
        }

        debug!(
            "Fetch finished, committing by moving '{}' to '{}'",
            self.tmp_path.display(),
            self.final_path.display()
        );
        if let Err(e) = fs::rename(&self.tmp_path, &self.final_path).await {
            error!("Failed to publish image {}: {}", self.meta.id, e);
            self.discard_to_invalid(&e.to_string()).await;
            return Err(CacheError::Io(e));
        }

        if let Err(e) = self.attributes.relocate(&self.tmp_path, &self.final_path) {
            warn!("Failed to move attributes of image {}: {}", self.meta.id, e);
        }

        Ok(self.final_path.clone())
    }

    /// Abandon the entry: attach `image_name` and `error`, then rename into `invalid/`
    ///
    /// Returns the path of the invalid entry. The caller stays responsible for
    /// propagating `err`.
    pub async fn rollback<E>(mut self, err: &E) -> CacheResult<PathBuf>
    where
        E: fmt::Display + ?Sized,
    {
        self.finished = true;
        if let Err(e) = self.close_file().await {
            debug!("Ignoring flush failure during rollback: {}", e);
        }
        self.move_to_invalid(&err.to_string()).await
    }

    async fn close_file(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    fn write_commit_attributes(&self) -> CacheResult<()> {
        self.attributes
            .set(&self.tmp_path, attributes::IMAGE_NAME, &self.meta.name)?;
        self.attributes.set(&self.tmp_path, attributes::HITS, "0")
    }

    fn write_rollback_attributes(&self, reason: &str) {
        let result = self
            .attributes
            .set(&self.tmp_path, attributes::IMAGE_NAME, &self.meta.name)
            .and_then(|_| {
                self.attributes
                    .set(&self.tmp_path, attributes::ERROR, reason)
            });
        if let Err(e) = result {
            warn!(
                "Failed to record rollback attributes for image {}: {}",
                self.meta.id, e
            );
        }
    }

    async fn move_to_invalid(&self, reason: &str) -> CacheResult<PathBuf> {
        self.write_rollback_attributes(reason);

        debug!(
            "Fetch errored, rolling back by moving '{}' to '{}'",
            self.tmp_path.display(),
            self.invalid_path.display()
        );
        fs::rename(&self.tmp_path, &self.invalid_path)
            .await
            .map_err(|e| {
                error!("Failed to roll back image {}: {}", self.meta.id, e);
                CacheError::Io(e)
            })?;

        if let Err(e) = self.attributes.relocate(&self.tmp_path, &self.invalid_path) {
            warn!("Failed to move attributes of image {}: {}", self.meta.id, e);
        }
        Ok(self.invalid_path.clone())
    }

    /// Rollback used when the original failure is already being returned
    async fn discard_to_invalid(&self, reason: &str) {
        if let Err(e) = self.move_to_invalid(reason).await {
            error!("Image {} left in tmp after failed commit: {}", self.meta.id, e);
        }
    }

    fn rollback_blocking(&mut self) {
        self.finished = true;
        drop(self.file.take());
        self.write_rollback_attributes(session::DROPPED_BEFORE_COMMIT);

        debug!(
            "Write session dropped, rolling back by moving '{}' to '{}'",
            self.tmp_path.display(),
            self.invalid_path.display()
        );
        match std::fs::rename(&self.tmp_path, &self.invalid_path) {
            Ok(()) => {
                if let Err(e) = self.attributes.relocate(&self.tmp_path, &self.invalid_path) {
                    warn!("Failed to move attributes of image {}: {}", self.meta.id, e);
                }
            }
            Err(e) => error!("Failed to roll back image {}: {}", self.meta.id, e),
        }
    }
}

impl Drop for WriteSession {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "Write session for image {} dropped without commit or rollback",
                self.meta.id
            );
            self.rollback_blocking();
        }
    }
}

fn finished_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "write session already finished")
}

impl AsyncWrite for WriteSession {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(file) = this.file.as_mut() else {
            return Poll::Ready(Err(finished_error()));
        };
        let poll = Pin::new(file).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &poll {
            this.bytes_written += *written as u64;
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Err(finished_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file.as_mut() {
            Some(file) => Pin::new(file).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Readable handle on a committed cache entry
pub struct ReadSession {
    id: ImageId,
    path: PathBuf,
    file: File,
    attributes: Arc<dyn AttributeStore>,
}

impl fmt::Debug for ReadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSession")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

impl ReadSession {
    /// Open the committed entry for `id`
    pub(crate) async fn open(
        layout: &CacheLayout,
        attributes: Arc<dyn AttributeStore>,
        id: ImageId,
    ) -> CacheResult<Self> {
        let path = layout.path_for(id, CacheDir::Main);
        let file = File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CacheError::NotFound { id },
            _ => CacheError::Io(e),
        })?;

        Ok(Self {
            id,
            path,
            file,
            attributes,
        })
    }

    /// Image being read
    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Path of the committed entry
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the entry in bytes
    pub async fn len(&self) -> CacheResult<u64> {
        Ok(self.file.metadata().await?.len())
    }

    /// Finish reading and count the hit
    ///
    /// Best-effort: concurrent readers may lose increments and failures are
    /// only logged. Returns the new hit count when it could be recorded.
    pub async fn close(self) -> Option<u64> {
        let Self {
            id,
            path,
            file,
            attributes,
        } = self;
        drop(file);

        match attributes.increment(&path, attributes::HITS) {
            Ok(hits) => {
                debug!("Image {} read complete, {} hits", id, hits);
                Some(hits)
            }
            Err(e) => {
                warn!("Failed to record cache hit for image {}: {}", id, e);
                None
            }
        }
    }
}

impl AsyncRead for ReadSession {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}
