//! Integration tests for the prefetch queue and worker
//!
//! These tests verify the queue state machine through the public API and run
//! a worker against a directory-backed origin.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::StreamExt;
use image_cache::app::cache::{CacheConfig, CacheDir, CacheEntry, ImageCache, MemoryStore};
use image_cache::app::models::{ImageId, ImageMeta, PrefetchState, PrefetchStatus};
use image_cache::app::prefetch::{
    create_shutdown_channel, DirectorySource, PrefetchConfig, PrefetchOutcome, PrefetchQueue,
    Prefetcher,
};
use image_cache::errors::PrefetchError;
use tempfile::TempDir;

async fn create_queue(temp_dir: &TempDir) -> PrefetchQueue {
    let config = CacheConfig::with_cache_root(temp_dir.path().join("root"));
    let cache = ImageCache::with_attribute_store(config, Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    PrefetchQueue::new(cache)
}

fn meta(id: u64, name: &str) -> ImageMeta {
    ImageMeta::new(ImageId::new(id), name)
}

fn age_marker(queue: &PrefetchQueue, id: u64, seconds: u64) {
    let marker = queue.cache().path_for(ImageId::new(id), CacheDir::Prefetch);
    let file = std::fs::OpenOptions::new().write(true).open(marker).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(seconds))
        .unwrap();
}

#[tokio::test]
async fn test_scenario_enqueue_promote_release() {
    let temp_dir = TempDir::new().unwrap();
    let queue = create_queue(&temp_dir).await;
    let id = ImageId::new(9);

    queue.enqueue(&meta(9, "x")).await.unwrap();
    assert_eq!(queue.dequeue_next().await.unwrap(), id);
    queue.promote(id).await.unwrap();
    assert!(queue.is_any_prefetching().await);
    queue.release(id).await.unwrap();
    assert!(!queue.is_any_prefetching().await);
    assert_eq!(queue.state(id), PrefetchState::Absent);
}

#[tokio::test]
async fn test_enqueue_after_hit_is_already_cached() {
    let temp_dir = TempDir::new().unwrap();
    let queue = create_queue(&temp_dir).await;

    queue
        .cache()
        .write_from(meta(1, "one"), &b"bytes"[..])
        .await
        .unwrap();
    assert!(queue.cache().hit(ImageId::new(1)));

    let result = queue.enqueue(&meta(1, "one")).await;
    assert!(matches!(result, Err(PrefetchError::AlreadyCached { .. })));
}

#[tokio::test]
async fn test_enqueue_twice_is_already_queued() {
    let temp_dir = TempDir::new().unwrap();
    let queue = create_queue(&temp_dir).await;

    queue.enqueue(&meta(2, "two")).await.unwrap();
    let result = queue.enqueue(&meta(2, "two")).await;
    assert!(matches!(result, Err(PrefetchError::AlreadyQueued { .. })));
}

#[tokio::test]
async fn test_fifo_order() {
    let temp_dir = TempDir::new().unwrap();
    let queue = create_queue(&temp_dir).await;

    queue.enqueue(&meta(100, "a")).await.unwrap();
    age_marker(&queue, 100, 60);
    queue.enqueue(&meta(200, "b")).await.unwrap();
    age_marker(&queue, 200, 30);

    assert_eq!(queue.dequeue_next().await.unwrap(), ImageId::new(100));
}

#[tokio::test]
async fn test_prefetch_entries_report_status() {
    let temp_dir = TempDir::new().unwrap();
    let queue = create_queue(&temp_dir).await;

    queue.enqueue(&meta(1, "queued")).await.unwrap();
    queue.enqueue(&meta(2, "running")).await.unwrap();
    queue.promote(ImageId::new(2)).await.unwrap();

    let mut entries: Vec<CacheEntry> = queue.cache().prefetch_entries().collect().await;
    entries.sort_by_key(|entry| entry.id);

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].status(), Some(PrefetchStatus::Queued));
    assert_eq!(entries[0].name, "queued");
    assert_eq!(entries[1].status(), Some(PrefetchStatus::InProgress));
    assert_eq!(entries[1].name, "running");
}

#[tokio::test]
async fn test_worker_drains_queue_until_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let origin = temp_dir.path().join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    let queue = create_queue(&temp_dir).await;

    for (id, age) in [(10u64, 30u64), (11, 20), (12, 10)] {
        std::fs::write(origin.join(id.to_string()), format!("image {}", id)).unwrap();
        queue.enqueue(&meta(id, "img")).await.unwrap();
        age_marker(&queue, id, age);
    }
    // Queued but missing at the origin
    queue.enqueue(&meta(13, "missing")).await.unwrap();

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let worker = Prefetcher::new(
        queue.clone(),
        Arc::new(DirectorySource::new(&origin)),
        PrefetchConfig::testing(),
    );
    let handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::time::timeout(Duration::from_secs(10), async {
        while queue.dequeue_next().await.is_ok() || queue.is_any_prefetching().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(()).unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.failed, 1);
    for id in [10u64, 11, 12] {
        assert_eq!(
            queue.cache().read_all(ImageId::new(id)).await.unwrap(),
            format!("image {}", id).into_bytes()
        );
    }
    assert!(!queue.cache().hit(ImageId::new(13)));
    assert_eq!(queue.state(ImageId::new(13)), PrefetchState::Absent);
}

#[tokio::test]
async fn test_run_once_reports_busy_worker() {
    let temp_dir = TempDir::new().unwrap();
    let queue = create_queue(&temp_dir).await;
    queue.enqueue(&meta(1, "a")).await.unwrap();
    queue.enqueue(&meta(2, "b")).await.unwrap();
    queue.promote(ImageId::new(1)).await.unwrap();

    let mut worker = Prefetcher::new(
        queue.clone(),
        Arc::new(DirectorySource::new(temp_dir.path())),
        PrefetchConfig::testing(),
    );
    assert_eq!(worker.run_once().await.unwrap(), PrefetchOutcome::Busy);

    queue.release(ImageId::new(1)).await.unwrap();
    let outcome = worker.run_once().await.unwrap();
    assert!(matches!(outcome, PrefetchOutcome::Failed { id, .. } if id == ImageId::new(2)));
}
