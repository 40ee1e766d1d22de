//! framekv server binary.
//!
//! Features:
//! - Length-prefixed binary protocol with get, set, del
//! - Pipelined requests answered in order
//! - Configuration via CLI arguments or TOML file

use framekv::config::Config;
use framekv::runtime;
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
        max_message_size = config.max_message_size,
        max_args = config.max_args,
        "Starting framekv server"
    );

    runtime::run(&config)?;
    Ok(())
}
