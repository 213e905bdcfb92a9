//! Prefetch worker
//!
//! The worker drains the prefetch queue one request at a time: claim the
//! oldest request, stream it from the origin into a write session, then
//! release the marker whatever the outcome. Workers sharing a root back off
//! while another request is in progress.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::config::PrefetchConfig;
use super::queue::PrefetchQueue;
use super::source::ImageSource;
use crate::app::models::{ImageId, ImageMeta};
use crate::errors::{describe_chain, PrefetchError, PrefetchResult};

/// Result of one worker iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// Another request is in progress
    Busy,
    /// Nothing queued
    Idle,
    /// The image was cached while it waited in the queue
    AlreadyCached { id: ImageId },
    /// The image was fetched and committed
    Fetched { id: ImageId, bytes: u64 },
    /// The fetch failed and nothing was committed
    Failed { id: ImageId, reason: String },
}

impl PrefetchOutcome {
    /// True when the iteration found no work to do
    pub fn is_idle(&self) -> bool {
        matches!(self, PrefetchOutcome::Busy | PrefetchOutcome::Idle)
    }
}

/// Counters over a worker's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Images fetched and committed
    pub fetched: u64,
    /// Bytes committed
    pub bytes: u64,
    /// Requests that failed
    pub failed: u64,
    /// Requests skipped because the image was already cached
    pub already_cached: u64,
    /// Consecutive polls that found no work
    pub consecutive_empty_polls: u32,
}

impl PrefetchStats {
    fn record(&mut self, outcome: &PrefetchOutcome) {
        match outcome {
            PrefetchOutcome::Busy | PrefetchOutcome::Idle => {
                self.consecutive_empty_polls = self.consecutive_empty_polls.saturating_add(1);
                return;
            }
            PrefetchOutcome::AlreadyCached { .. } => self.already_cached += 1,
            PrefetchOutcome::Fetched { bytes, .. } => {
                self.fetched += 1;
                self.bytes += bytes;
            }
            PrefetchOutcome::Failed { .. } => self.failed += 1,
        }
        self.consecutive_empty_polls = 0;
    }
}

/// Single-flight prefetch worker
#[derive(Debug)]
pub struct Prefetcher {
    queue: PrefetchQueue,
    source: Arc<dyn ImageSource>,
    config: PrefetchConfig,
    stats: PrefetchStats,
}

impl Prefetcher {
    /// Create a worker draining `queue` from `source`
    pub fn new(queue: PrefetchQueue, source: Arc<dyn ImageSource>, config: PrefetchConfig) -> Self {
        Self {
            queue,
            source,
            config,
            stats: PrefetchStats::default(),
        }
    }

    /// Queue being drained
    pub fn queue(&self) -> &PrefetchQueue {
        &self.queue
    }

    /// Counters so far
    pub fn stats(&self) -> &PrefetchStats {
        &self.stats
    }

    /// Process at most one queued request
    pub async fn run_once(&mut self) -> PrefetchResult<PrefetchOutcome> {
        let outcome = self.iteration().await?;
        self.stats.record(&outcome);
        Ok(outcome)
    }

    async fn iteration(&self) -> PrefetchResult<PrefetchOutcome> {
        if self.queue.is_any_prefetching().await {
            debug!("A prefetch is already in progress");
            return Ok(PrefetchOutcome::Busy);
        }

        let meta = match self.queue.claim().await {
            Ok(meta) => meta,
            Err(PrefetchError::Empty) => return Ok(PrefetchOutcome::Idle),
            Err(e) => return Err(e),
        };

        let outcome = self.prefetch(&meta).await;
        self.queue.release(meta.id).await?;
        Ok(outcome)
    }

    async fn prefetch(&self, meta: &ImageMeta) -> PrefetchOutcome {
        let id = meta.id;
        let cache = self.queue.cache();

        if cache.hit(id) {
            info!("Image {} was cached while queued, skipping prefetch", id);
            return PrefetchOutcome::AlreadyCached { id };
        }

        info!("Prefetching image {} ({})", id, meta.name);
        let stream = match self.source.fetch(meta).await {
            Ok(stream) => stream,
            Err(source) => {
                let reason = describe_chain(&PrefetchError::Source { id, source });
                warn!("{}", reason);
                return PrefetchOutcome::Failed { id, reason };
            }
        };

        match cache.write_from(meta.clone(), stream).await {
            Ok(bytes) => {
                info!("Prefetched image {} ({} bytes)", id, bytes);
                PrefetchOutcome::Fetched { id, bytes }
            }
            Err(e) => {
                warn!("Prefetch of image {} failed: {}", id, e);
                let error = PrefetchError::Cache(e);
                PrefetchOutcome::Failed {
                    id,
                    reason: describe_chain(&error),
                }
            }
        }
    }

    /// Run until `shutdown` fires, sleeping with exponential backoff while idle
    ///
    /// A request in progress is always finished before the loop exits.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> PrefetchStats {
        info!("Prefetch worker starting");

        loop {
            if shutdown_requested(&mut shutdown) {
                break;
            }

            let pause = match self.run_once().await {
                Ok(outcome) if outcome.is_idle() => {
                    let pause = self.config.idle_backoff(self.stats.consecutive_empty_polls);
                    debug!(
                        "Prefetch worker idle (attempt {}), sleeping for {:?}",
                        self.stats.consecutive_empty_polls, pause
                    );
                    Some(pause)
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("Prefetch worker error: {}", e);
                    Some(self.config.error_sleep)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!(
            "Prefetch worker shutting down ({} fetched, {} failed)",
            self.stats.fetched, self.stats.failed
        );
        self.stats
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        shutdown.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}
