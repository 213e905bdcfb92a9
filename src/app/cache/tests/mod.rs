//! In-crate integration tests for the cache module
