//! Core data models for the image cache
//!
//! This module defines the identifiers and descriptors shared by every cache
//! component: the image identifier used as a filename in each state directory,
//! the caller-supplied image metadata, and the prefetch state of a request.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a cached image
///
/// The decimal rendering is the entry's filename in every cache directory.
/// Files whose names do not parse as an `ImageId` are not cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(u64);

impl ImageId {
    /// Create an identifier from its numeric value
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Filename used for this image in every cache directory
    pub fn file_name(&self) -> String {
        self.0.to_string()
    }

    /// Parse a directory entry filename, returning `None` for anything that is
    /// not a canonical image identifier
    pub fn from_file_name(name: &str) -> Option<Self> {
        // Reject "+7" or "007" so that a listed id always maps back to the same file
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if name.len() > 1 && name.starts_with('0') {
            return None;
        }
        name.parse().ok()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ImageId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl From<u64> for ImageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Caller-supplied description of an image being cached or prefetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    /// Image identifier
    pub id: ImageId,
    /// Human readable image name, stored as the `image_name` attribute
    pub name: String,
}

impl ImageMeta {
    /// Create new image metadata
    pub fn new(id: ImageId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// State of a prefetch request for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchState {
    /// No marker exists in either prefetch directory
    Absent,
    /// Marker waiting in the `prefetch` directory
    Queued,
    /// Marker claimed by a worker in the `prefetching` directory
    Prefetching,
}

/// Status reported for prefetch entries during introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefetchStatus {
    /// Found in the `prefetch` directory
    #[serde(rename = "queued")]
    Queued,
    /// Found in the `prefetching` directory
    #[serde(rename = "in-progress")]
    InProgress,
}

impl PrefetchStatus {
    /// String form used in listings
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefetchStatus::Queued => "queued",
            PrefetchStatus::InProgress => "in-progress",
        }
    }
}

impl fmt::Display for PrefetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
