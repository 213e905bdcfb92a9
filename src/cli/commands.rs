//! Command implementations for the CLI
//!
//! Each handler receives the resolved configuration and the cache it
//! operates on. Output goes to stdout; diagnostics go through `tracing`.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::fs::File;
use tracing::{debug, info};

use crate::app::cache::{format_bytes, CacheEntry, EntryKind, EntryStream, ImageCache};
use crate::app::models::{ImageId, ImageMeta};
use crate::app::prefetch::{
    create_shutdown_channel, DirectorySource, PrefetchConfig, PrefetchOutcome, PrefetchQueue,
    Prefetcher, SignalHandler,
};
use crate::cli::args::{
    ConfigArgs, GetArgs, GlobalArgs, ListArgs, PrefetchArgs, PurgeArgs, PutArgs, QueueArgs,
};
use crate::config::AppConfig;
use crate::errors::{AppError, PrefetchError, Result};

/// Load configuration and apply command line overrides
pub async fn load_config(global: &GlobalArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load(global.config.clone()).await?;
    if let Some(cache_dir) = &global.cache_dir {
        config.cache.cache_root = Some(cache_dir.clone());
    }
    if let Some(backend) = global.attributes {
        config.cache.attribute_backend = backend;
    }
    Ok(config)
}

/// Open the cache described by `config`
pub async fn open_cache(config: &AppConfig) -> Result<ImageCache> {
    let (cache_config, _) = config.to_runtime_config();
    let cache = ImageCache::new(cache_config).await?;
    debug!("Using cache at {}", cache.cache_root().display());
    Ok(cache)
}

/// Handle the list command
pub async fn handle_list(cache: &ImageCache, args: ListArgs) -> Result<()> {
    let mut entries: EntryStream = if args.invalid {
        cache.invalid_entries()
    } else if args.prefetch {
        cache.prefetch_entries()
    } else {
        cache.entries()
    };

    let mut count = 0usize;
    while let Some(entry) = entries.next().await {
        if args.json {
            let line = serde_json::to_string(&entry)
                .map_err(|e| AppError::generic(format!("Failed to encode entry: {}", e)))?;
            println!("{}", line);
        } else {
            println!("{}", format_entry(&entry));
        }
        count += 1;
    }

    if count == 0 && !args.json {
        println!("No entries");
    }
    Ok(())
}

fn format_entry(entry: &CacheEntry) -> String {
    let detail = match &entry.kind {
        EntryKind::Active { hits } => match hits {
            Some(hits) => format!("{} hits", hits),
            None => "hits unknown".to_string(),
        },
        EntryKind::Invalid { error } => format!("error: {}", error),
        EntryKind::Prefetch { status } => status.to_string(),
    };
    format!(
        "{:>12}  {:<32}  {:>10}  {}  {}",
        entry.id,
        entry.name,
        format_bytes(entry.size),
        entry.last_accessed.format("%Y-%m-%d %H:%M:%S UTC"),
        detail
    )
}

/// Handle the info command
pub async fn handle_info(cache: &ImageCache) -> Result<()> {
    let stats = cache.get_cache_stats().await;

    println!("💾 Cache Information");
    println!("===================");
    println!("Location: {}", stats.cache_root.display());
    println!("Attribute backend: {}", cache.attributes().name());
    println!(
        "Cached images: {} ({})",
        stats.cached_files_count,
        stats.format_cache_size()
    );
    println!(
        "Invalid images: {} ({}, {:.1}% of stored bytes)",
        stats.invalid_files_count,
        stats.format_invalid_size(),
        stats.invalid_percentage()
    );
    println!(
        "Writes in progress: {} ({})",
        stats.in_flight_writes,
        format_bytes(stats.in_flight_size)
    );
    println!(
        "Prefetch queue: {} queued, {} in progress",
        stats.queued_prefetches, stats.in_progress_prefetches
    );

    Ok(())
}

/// Handle the get command
pub async fn handle_get(cache: &ImageCache, args: GetArgs) -> Result<()> {
    let mut session = cache.open_read(args.id).await?;

    let copied = match &args.output {
        Some(path) => {
            let mut file = File::create(path).await?;
            tokio::io::copy(&mut session, &mut file).await?
        }
        None => {
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut session, &mut stdout).await?
        }
    };

    let hits = session.close().await;
    info!("Read image {} ({} bytes, hits: {:?})", args.id, copied, hits);
    if let Some(path) = args.output {
        println!("Wrote {} to {}", format_bytes(copied), path.display());
    }
    Ok(())
}

/// Handle the put command
pub async fn handle_put(cache: &ImageCache, args: PutArgs) -> Result<()> {
    let source = File::open(&args.file).await?;
    let meta = ImageMeta::new(args.id, args.name);
    let bytes = cache.write_from(meta, source).await?;
    println!("✅ Cached image {} ({})", args.id, format_bytes(bytes));
    Ok(())
}

/// Handle the purge command
pub async fn handle_purge(cache: &ImageCache, args: PurgeArgs) -> Result<()> {
    if args.all {
        let removed = cache.purge_all().await?;
        println!("🗑️  Removed {} entries", removed);
        return Ok(());
    }

    let id = args
        .id
        .ok_or_else(|| AppError::generic("An image id or --all is required"))?;
    if cache.hit(id) {
        cache.purge(id).await?;
        println!("🗑️  Removed image {}", id);
    } else {
        println!("Image {} is not cached", id);
    }
    Ok(())
}

/// Handle the queue command
pub async fn handle_queue(queue: &PrefetchQueue, args: QueueArgs) -> Result<()> {
    let meta = ImageMeta::new(args.id, args.name);
    match queue.enqueue(&meta).await {
        Ok(()) => {
            println!("Queued image {} for prefetching", meta.id);
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            println!("{}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Handle the cancel command
pub async fn handle_cancel(queue: &PrefetchQueue, id: ImageId) -> Result<()> {
    queue.cancel(id).await?;
    println!("Cancelled prefetch request {}", id);
    Ok(())
}

/// Handle the prefetch command
pub async fn handle_prefetch(
    queue: PrefetchQueue,
    config: PrefetchConfig,
    args: PrefetchArgs,
) -> Result<()> {
    let source = Arc::new(DirectorySource::new(args.source_dir));
    let mut prefetcher = Prefetcher::new(queue, source, config);

    if args.once {
        match prefetcher.run_once().await? {
            PrefetchOutcome::Busy => println!("Another prefetch is in progress"),
            PrefetchOutcome::Idle => println!("{}", PrefetchError::Empty),
            PrefetchOutcome::AlreadyCached { id } => {
                println!("Image {} was already cached", id)
            }
            PrefetchOutcome::Fetched { id, bytes } => {
                println!("✅ Prefetched image {} ({})", id, format_bytes(bytes))
            }
            PrefetchOutcome::Failed { id, reason } => {
                return Err(AppError::generic(format!(
                    "Prefetch of image {} failed: {}",
                    id, reason
                )));
            }
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let signal_task = SignalHandler::new(shutdown_tx).setup();

    println!("🚀 Prefetch worker running, press Ctrl+C to stop");
    let stats = prefetcher.run(shutdown_rx).await;
    signal_task.abort();

    println!();
    println!("📊 Prefetch Summary:");
    println!("  Fetched: {} ({})", stats.fetched, format_bytes(stats.bytes));
    println!("  Already cached: {}", stats.already_cached);
    println!("  Failed: {}", stats.failed);
    Ok(())
}

/// Handle the config command
pub async fn handle_config(config: &AppConfig, args: ConfigArgs) -> Result<()> {
    if args.init {
        let path: PathBuf = AppConfig::default_config_path()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?;
        if AppConfig::write_default_file(&path).await? {
            println!("📁 Created default configuration file:");
            println!("   {}", path.display());
            println!("   You can customize settings by editing this file.");
        } else {
            println!("Configuration file already exists: {}", path.display());
        }
        return Ok(());
    }

    let rendered = toml::to_string_pretty(config)
        .map_err(|e| AppError::generic(format!("Failed to render configuration: {}", e)))?;
    println!("# Effective configuration");
    for path in AppConfig::search_paths() {
        let marker = if path.exists() { "found" } else { "absent" };
        println!("# {} ({})", path.display(), marker);
    }
    println!();
    print!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::cache::{AttributeBackend, CacheConfig, MemoryStore};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    async fn create_cache(temp_dir: &TempDir) -> ImageCache {
        let config = CacheConfig::with_cache_root(temp_dir.path().join("cache"));
        ImageCache::with_attribute_store(config, Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    #[test]
    fn test_format_entry() {
        let entry = CacheEntry {
            id: ImageId::new(42),
            path: PathBuf::from("/cache/42"),
            name: "ubuntu".to_string(),
            size: 2048,
            last_accessed: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            kind: EntryKind::Active { hits: Some(3) },
        };

        let line = format_entry(&entry);
        assert!(line.contains("42"));
        assert!(line.contains("ubuntu"));
        assert!(line.contains("2.00 KB"));
        assert!(line.contains("2024-05-01 12:30:00 UTC"));
        assert!(line.ends_with("3 hits"));
    }

    #[tokio::test]
    async fn test_put_then_get_to_file() {
        let temp_dir = TempDir::new().unwrap();
        let cache = create_cache(&temp_dir).await;
        let input = temp_dir.path().join("input.img");
        let output = temp_dir.path().join("output.img");
        std::fs::write(&input, b"disk image").unwrap();

        handle_put(
            &cache,
            PutArgs {
                id: ImageId::new(3),
                name: "three".to_string(),
                file: input,
            },
        )
        .await
        .unwrap();
        handle_get(
            &cache,
            GetArgs {
                id: ImageId::new(3),
                output: Some(output.clone()),
            },
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(output).unwrap(), b"disk image");
        assert_eq!(cache.hits(ImageId::new(3)), Some(1));
    }

    #[tokio::test]
    async fn test_get_missing_image_fails() {
        let temp_dir = TempDir::new().unwrap();
        let cache = create_cache(&temp_dir).await;

        let result = handle_get(
            &cache,
            GetArgs {
                id: ImageId::new(404),
                output: None,
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Cache(_))));
    }

    #[tokio::test]
    async fn test_queue_conflict_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let queue = PrefetchQueue::new(create_cache(&temp_dir).await);
        let args = QueueArgs {
            id: ImageId::new(8),
            name: "eight".to_string(),
        };

        handle_queue(&queue, args.clone()).await.unwrap();
        handle_queue(&queue, args).await.unwrap();
        handle_cancel(&queue, ImageId::new(8)).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_config_applies_cli_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "[cache]\nattribute_backend = \"xattr\"\n").unwrap();

        let global = GlobalArgs {
            verbose: false,
            very_verbose: false,
            quiet: false,
            config: Some(config_path),
            cache_dir: Some(temp_dir.path().join("override")),
            attributes: Some(AttributeBackend::Memory),
        };

        let config = load_config(&global).await.unwrap();
        assert_eq!(
            config.cache.cache_root,
            Some(temp_dir.path().join("override"))
        );
        assert_eq!(config.cache.attribute_backend, AttributeBackend::Memory);
    }
}
