//! # udpcast node
//!
//! Runs one multicast receiver and one publisher on a shared reactor.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! udpcast
//!
//! # Run with a specific config file
//! UDPCAST_CONFIG=/path/to/udpcast.toml udpcast
//!
//! # Override single values from the environment
//! UDPCAST_RECEIVER__PORT=9000 UDPCAST_REACTOR__WORKER_THREADS=2 udpcast
//! ```

mod config;
mod metrics;
mod node;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "udpcast=info,udpcast_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        receiver_port = config.receiver.port,
        publisher_port = config.publisher.port,
        "Starting udpcast node"
    );

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    node::run(&config)
}
