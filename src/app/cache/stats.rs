//! Cache statistics and disk usage summary
//!
//! Counts and sizes are collected from one listing pass over each state
//! directory, so the numbers are a snapshot and may be stale under concurrent
//! writers.

use std::path::PathBuf;

use serde::Serialize;

use crate::app::models::PrefetchStatus;

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Cache root directory
    pub cache_root: PathBuf,
    /// Number of committed entries
    pub cached_files_count: usize,
    /// Total size of committed entries in bytes
    pub total_cache_size: u64,
    /// Number of rolled-back entries
    pub invalid_files_count: usize,
    /// Total size of rolled-back entries in bytes
    pub invalid_size: u64,
    /// Number of files in `tmp/`
    pub in_flight_writes: usize,
    /// Bytes written so far by in-flight sessions
    pub in_flight_size: u64,
    /// Prefetch requests waiting in the queue
    pub queued_prefetches: usize,
    /// Prefetch requests claimed by a worker
    pub in_progress_prefetches: usize,
}

impl CacheStats {
    /// Create new cache statistics
    pub fn new(cache_root: PathBuf) -> Self {
        Self {
            cache_root,
            ..Self::default()
        }
    }

    pub(crate) fn record_active(&mut self, size: u64) {
        self.cached_files_count += 1;
        self.total_cache_size += size;
    }

    pub(crate) fn record_invalid(&mut self, size: u64) {
        self.invalid_files_count += 1;
        self.invalid_size += size;
    }

    pub(crate) fn record_in_flight(&mut self, size: u64) {
        self.in_flight_writes += 1;
        self.in_flight_size += size;
    }

    pub(crate) fn record_prefetch(&mut self, status: PrefetchStatus) {
        match status {
            PrefetchStatus::Queued => self.queued_prefetches += 1,
            PrefetchStatus::InProgress => self.in_progress_prefetches += 1,
        }
    }

    /// Share of stored bytes held by rolled-back entries
    pub fn invalid_percentage(&self) -> f64 {
        let total = self.total_cache_size + self.invalid_size;
        if total == 0 {
            return 0.0;
        }
        (self.invalid_size as f64 / total as f64) * 100.0
    }

    /// Format cache size in human-readable format
    pub fn format_cache_size(&self) -> String {
        format_bytes(self.total_cache_size)
    }

    /// Format the size of `invalid/` in human-readable format
    pub fn format_invalid_size(&self) -> String {
        format_bytes(self.invalid_size)
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_creation() {
        let cache_root = PathBuf::from("/cache");
        let stats = CacheStats::new(cache_root.clone());

        assert_eq!(stats.cache_root, cache_root);
        assert_eq!(stats.cached_files_count, 0);
        assert_eq!(stats.total_cache_size, 0);
        assert_eq!(stats.invalid_files_count, 0);
        assert_eq!(stats.in_flight_writes, 0);
    }

    #[test]
    fn test_cache_stats_recording() {
        let mut stats = CacheStats::new(PathBuf::from("/cache"));

        stats.record_active(1024);
        stats.record_active(2048);
        stats.record_invalid(1024);
        stats.record_in_flight(10);
        stats.record_prefetch(PrefetchStatus::Queued);
        stats.record_prefetch(PrefetchStatus::Queued);
        stats.record_prefetch(PrefetchStatus::InProgress);

        assert_eq!(stats.cached_files_count, 2);
        assert_eq!(stats.total_cache_size, 3072);
        assert_eq!(stats.invalid_files_count, 1);
        assert_eq!(stats.in_flight_size, 10);
        assert_eq!(stats.queued_prefetches, 2);
        assert_eq!(stats.in_progress_prefetches, 1);
        assert!((stats.invalid_percentage() - 25.0).abs() < 0.1);
    }

    #[test]
    fn test_invalid_percentage_of_empty_cache() {
        let stats = CacheStats::new(PathBuf::from("/cache"));
        assert_eq!(stats.invalid_percentage(), 0.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_bytes(1024_u64.pow(4)), "1.00 TB");
    }

    #[test]
    fn test_format_cache_size() {
        let mut stats = CacheStats::new(PathBuf::from("/cache"));
        stats.record_active(2048);
        assert_eq!(stats.format_cache_size(), "2.00 KB");
        assert_eq!(stats.format_invalid_size(), "0 B");
    }
}
