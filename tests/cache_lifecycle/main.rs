//! Integration tests for the cache lifecycle
//!
//! These tests drive the public API end to end against a temporary root and
//! check the on-disk state after each step.

use std::sync::Arc;

use futures::StreamExt;
use image_cache::app::cache::{
    AttributeStore, CacheConfig, CacheDir, CacheEntry, ImageCache, MemoryStore, SidecarStore,
};
use image_cache::app::models::{ImageId, ImageMeta};
use image_cache::errors::CacheError;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn cache_with(temp_dir: &TempDir, store: Arc<dyn AttributeStore>) -> ImageCache {
    let config = CacheConfig::with_cache_root(temp_dir.path().join("root"));
    ImageCache::with_attribute_store(config, store).await.unwrap()
}

fn stores() -> Vec<Arc<dyn AttributeStore>> {
    vec![Arc::new(MemoryStore::new()), Arc::new(SidecarStore::new())]
}

#[tokio::test]
async fn test_scenario_commit_then_read() {
    for store in stores() {
        let temp_dir = TempDir::new().unwrap();
        let cache = cache_with(&temp_dir, store).await;
        let id = ImageId::new(42);

        let mut session = cache
            .open_write(ImageMeta::new(id, "ubuntu"))
            .await
            .unwrap();
        session.write_all(b"abc").await.unwrap();
        session.commit().await.unwrap();

        assert!(cache.hit(id));
        assert!(!cache.path_for(id, CacheDir::Tmp).exists());

        let mut reader = cache.open_read(id).await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "abc");
        reader.close().await;

        assert_eq!(cache.hits(id), Some(1));
    }
}

#[tokio::test]
async fn test_scenario_failed_body_rolls_back() {
    for store in stores() {
        let temp_dir = TempDir::new().unwrap();
        let cache = cache_with(&temp_dir, store).await;
        let id = ImageId::new(7);

        let result: Result<(), CacheError> = cache
            .write_with(ImageMeta::new(id, "seven"), |session| {
                Box::pin(async move {
                    session.write_all(b"partial").await?;
                    Err(CacheError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "origin closed the stream",
                    )))
                })
            })
            .await;

        // The original error comes back untouched
        match result {
            Err(CacheError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!cache.hit(id));
        assert!(!cache.path_for(id, CacheDir::Tmp).exists());

        let invalid: Vec<CacheEntry> = cache.invalid_entries().collect().await;
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].id, id);
        assert_eq!(invalid[0].error(), Some("origin closed the stream"));
    }
}

#[tokio::test]
async fn test_early_return_rolls_back() {
    async fn copy_then_bail(cache: &ImageCache) -> Result<(), CacheError> {
        let mut session = cache.open_write(ImageMeta::new(ImageId::new(5), "five")).await?;
        session.write_all(b"some bytes").await?;
        Err(CacheError::NotFound {
            id: ImageId::new(5),
        })
    }

    let temp_dir = TempDir::new().unwrap();
    let cache = cache_with(&temp_dir, Arc::new(MemoryStore::new())).await;

    assert!(copy_then_bail(&cache).await.is_err());
    assert!(!cache.hit(ImageId::new(5)));
    assert!(!cache.is_being_written(ImageId::new(5)));

    let invalid: Vec<CacheEntry> = cache.invalid_entries().collect().await;
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].error(), Some("write session dropped before commit"));
}

#[tokio::test]
async fn test_purge_of_never_cached_id_changes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let cache = cache_with(&temp_dir, Arc::new(MemoryStore::new())).await;
    cache
        .write_from(ImageMeta::new(ImageId::new(1), "one"), &b"1"[..])
        .await
        .unwrap();

    cache.purge(ImageId::new(2)).await.unwrap();

    let ids: Vec<ImageId> = cache.entries().map(|entry| entry.id).collect().await;
    assert_eq!(ids, vec![ImageId::new(1)]);
}

#[tokio::test]
async fn test_read_of_missing_entry() {
    let temp_dir = TempDir::new().unwrap();
    let cache = cache_with(&temp_dir, Arc::new(MemoryStore::new())).await;

    assert!(matches!(
        cache.open_read(ImageId::new(3)).await,
        Err(CacheError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_sessions_for_different_ids() {
    let temp_dir = TempDir::new().unwrap();
    let cache = cache_with(&temp_dir, Arc::new(SidecarStore::new())).await;

    let handles: Vec<_> = (1..=16u64)
        .map(|id| {
            let cache = cache.clone();
            tokio::spawn(async move {
                let payload = vec![id as u8; id as usize * 100];
                cache
                    .write_from(ImageMeta::new(ImageId::new(id), format!("img-{}", id)), &payload[..])
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut entries: Vec<CacheEntry> = cache.entries().collect().await;
    entries.sort_by_key(|entry| entry.id);
    assert_eq!(entries.len(), 16);
    for entry in &entries {
        assert_eq!(entry.size, entry.id.value() * 100);
        assert_eq!(entry.name, format!("img-{}", entry.id));
        assert_eq!(entry.hits(), Some(0));
    }
}
