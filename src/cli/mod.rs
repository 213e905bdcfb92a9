//! Command-line interface components
//!
//! This module contains CLI-specific code for the image cache binary:
//! argument parsing and the command handlers.

pub mod args;
pub mod commands;

pub use args::{
    Cli, Commands, ConfigArgs, GetArgs, GlobalArgs, ListArgs, PrefetchArgs, PurgeArgs, PutArgs,
    QueueArgs,
};
pub use commands::{
    handle_cancel, handle_config, handle_get, handle_info, handle_list, handle_prefetch,
    handle_purge, handle_put, handle_queue, load_config, open_cache,
};
