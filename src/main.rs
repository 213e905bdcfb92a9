//! Image Cache CLI application
//!
//! Command-line interface for inspecting and maintaining an image cache and
//! running its prefetch worker.

use std::process;
use std::str::FromStr;

use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use image_cache::app::PrefetchQueue;
use image_cache::cli::{
    handle_cancel, handle_config, handle_get, handle_info, handle_list, handle_prefetch,
    handle_purge, handle_put, handle_queue, load_config, open_cache, Cli, Commands,
};
use image_cache::config::AppConfig;
use image_cache::errors::Result;

#[tokio::main]
async fn main() {
    // Initialize program
    let result = run().await;

    // Handle any errors that occurred
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    // Parse command line arguments
    let cli = Cli::parse_args();

    let config = load_config(&cli.global).await?;

    // Initialize logging based on verbosity
    init_logging(&cli, &config);

    info!("Image cache v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config(args) => handle_config(&config, args).await,
        command => execute(command, &config).await,
    }
}

/// Execute a command that operates on the cache
async fn execute(command: Commands, config: &AppConfig) -> Result<()> {
    let cache = open_cache(config).await?;

    match command {
        Commands::List(args) => handle_list(&cache, args).await,
        Commands::Info => handle_info(&cache).await,
        Commands::Get(args) => handle_get(&cache, args).await,
        Commands::Put(args) => handle_put(&cache, args).await,
        Commands::Purge(args) => handle_purge(&cache, args).await,
        Commands::Queue(args) => handle_queue(&PrefetchQueue::new(cache), args).await,
        Commands::Cancel { id } => handle_cancel(&PrefetchQueue::new(cache), id).await,
        Commands::Prefetch(args) => {
            info!("Executing prefetch command");
            handle_prefetch(PrefetchQueue::new(cache), config.prefetch.clone(), args).await
        }
        Commands::Config(args) => handle_config(config, args).await,
    }
}

/// Initialize logging from CLI flags, falling back to `[logging].level`
fn init_logging(cli: &Cli, config: &AppConfig) {
    let configured = tracing::Level::from_str(&config.logging.level);
    let log_level = match (&configured, cli.has_log_override()) {
        (Ok(level), false) => *level,
        _ => cli.log_level(),
    };

    // Create environment filter
    let filter = match format!("image_cache={}", log_level).parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };

    // Initialize subscriber
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose) // Show levels only in very verbose mode
        .init();

    if configured.is_err() {
        warn!(
            "Ignoring unknown log level '{}' in configuration",
            config.logging.level
        );
    }
    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
