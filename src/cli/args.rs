//! Command-line argument parsing for the image cache
//!
//! This module defines the CLI structure using clap derive macros, covering
//! inspection of the cache, manual population and purging, and the prefetch
//! queue and worker.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::cache::AttributeBackend;
use crate::app::models::ImageId;

/// Image Cache - read-through disk cache for large images
#[derive(Parser, Debug)]
#[command(
    name = "image_cache",
    version,
    about = "Inspect and maintain a read-through disk cache of images",
    long_about = "Manages a disk cache of large immutable images.
Entries are published atomically, failed writes are kept aside for inspection,
and a FIFO prefetch queue warms the cache ahead of reads."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache directory path
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Attribute backend (auto, xattr, sidecar, memory)
    #[arg(long, global = true, value_name = "BACKEND")]
    pub attributes: Option<AttributeBackend>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List cache entries
    List(ListArgs),

    /// Show cache statistics
    Info,

    /// Read an image from the cache, counting a hit
    Get(GetArgs),

    /// Store a file in the cache
    Put(PutArgs),

    /// Remove cached images
    Purge(PurgeArgs),

    /// Queue an image for prefetching
    Queue(QueueArgs),

    /// Cancel a queued prefetch request
    Cancel {
        /// Image identifier
        id: ImageId,
    },

    /// Run the prefetch worker
    Prefetch(PrefetchArgs),

    /// Show or create the configuration file
    Config(ConfigArgs),
}

/// Arguments for the list command
#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// List rolled-back entries instead of committed ones
    #[arg(long, conflicts_with = "prefetch")]
    pub invalid: bool,

    /// List prefetch requests instead of committed entries
    #[arg(long)]
    pub prefetch: bool,

    /// Print entries as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the get command
#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    /// Image identifier
    pub id: ImageId,

    /// Write the image to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Arguments for the put command
#[derive(Args, Debug, Clone)]
pub struct PutArgs {
    /// Image identifier
    pub id: ImageId,

    /// Image name recorded on the entry
    pub name: String,

    /// File holding the image bytes
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Arguments for the purge command
#[derive(Args, Debug, Clone)]
pub struct PurgeArgs {
    /// Image identifier
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub id: Option<ImageId>,

    /// Remove every committed and invalid entry
    #[arg(long)]
    pub all: bool,
}

/// Arguments for the queue command
#[derive(Args, Debug, Clone)]
pub struct QueueArgs {
    /// Image identifier
    pub id: ImageId,

    /// Image name recorded on the request
    pub name: String,
}

/// Arguments for the prefetch command
#[derive(Args, Debug, Clone)]
pub struct PrefetchArgs {
    /// Directory serving images as `<dir>/<id>`
    #[arg(long, value_name = "DIR")]
    pub source_dir: PathBuf,

    /// Process at most one request and exit
    #[arg(long)]
    pub once: bool,
}

/// Arguments for the config command
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Write a default config file to the user config directory
    #[arg(long)]
    pub init: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }

    /// True when a logging flag was given on the command line
    pub fn has_log_override(&self) -> bool {
        self.global.quiet || self.global.verbose || self.global.very_verbose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("image_cache").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_log_level() {
        assert_eq!(parse(&["-q", "info"]).log_level(), tracing::Level::ERROR);
        assert_eq!(parse(&["info", "-v"]).log_level(), tracing::Level::INFO);
        assert_eq!(
            parse(&["--very-verbose", "info"]).log_level(),
            tracing::Level::DEBUG
        );

        let cli = parse(&["info"]);
        assert_eq!(cli.log_level(), tracing::Level::WARN);
        assert!(!cli.has_log_override());
    }

    #[test]
    fn test_global_options() {
        let cli = parse(&["--cache-dir", "/srv/cache", "--attributes", "sidecar", "info"]);
        assert_eq!(cli.global.cache_dir, Some(PathBuf::from("/srv/cache")));
        assert_eq!(cli.global.attributes, Some(AttributeBackend::Sidecar));
    }

    #[test]
    fn test_image_ids_are_parsed() {
        let cli = parse(&["queue", "42", "ubuntu"]);
        match cli.command {
            Commands::Queue(args) => {
                assert_eq!(args.id, ImageId::new(42));
                assert_eq!(args.name, "ubuntu");
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from(["image_cache", "get", "not-a-number"]).is_err());
    }

    #[test]
    fn test_purge_requires_id_or_all() {
        assert!(Cli::try_parse_from(["image_cache", "purge"]).is_err());
        assert!(Cli::try_parse_from(["image_cache", "purge", "1", "--all"]).is_err());

        match parse(&["purge", "--all"]).command {
            Commands::Purge(args) => {
                assert!(args.all);
                assert_eq!(args.id, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_list_filters_conflict() {
        assert!(Cli::try_parse_from(["image_cache", "list", "--invalid", "--prefetch"]).is_err());

        match parse(&["list", "--prefetch", "--json"]).command {
            Commands::List(args) => {
                assert!(args.prefetch);
                assert!(args.json);
                assert!(!args.invalid);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
