//! frame-echo: a length-prefixed echo server
//!
//! Features:
//! - Single-threaded readiness loop (epoll on Linux, kqueue on macOS)
//! - Request pipelining with in-order responses
//! - Bounded per-connection buffers
//! - Configuration via CLI arguments or TOML file

use frame_echo::config::Config;
use frame_echo::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        backlog = config.backlog,
        events_capacity = config.events_capacity,
        "Starting frame-echo server"
    );

    runtime::run(&config)?;
    Ok(())
}
