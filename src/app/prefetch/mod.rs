//! Prefetch queue and worker
//!
//! Callers [`PrefetchQueue::enqueue`] images they expect to be read soon. A
//! [`Prefetcher`] drains the queue oldest first, streaming each image from an
//! [`ImageSource`] into the cache.
//!
//! # Module Organization
//!
//! - [`queue`] - Directory-backed FIFO queue
//! - [`source`] - Origin source abstraction
//! - [`config`] - Worker configuration
//! - [`worker`] - Worker loop
//! - [`signals`] - Graceful shutdown on Ctrl-C and SIGTERM

pub mod config;
pub mod queue;
pub mod signals;
pub mod source;
pub mod worker;

// Re-export main public API
pub use config::PrefetchConfig;
pub use queue::PrefetchQueue;
pub use signals::{create_shutdown_channel, SignalHandler};
pub use source::{DirectorySource, ImageSource, ImageStream};
pub use worker::{PrefetchOutcome, PrefetchStats, Prefetcher};
