// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Typed configuration loaded from the environment
// - error:     Error taxonomy shared across the pipeline
// - schema:    Normalized record and stream-id definitions
// - fixed:     Fixed-point decimal representation
// - util:      Shared helpers (clocks, symbol handling)
// - metrics:   Lock-free runtime counters
// - exchanges: Venue adapters (classify / parse / subscribe)
// - ipc:       Shared-memory stream transport
// - wire:      Binary message codec for the streams
// - publisher: Stream handle registry and publication
// - collector: Connection runtime and supervision
// - status:    HTTP status/metrics endpoint
//
mod collector;
mod config;
mod error;
mod exchanges;
mod fixed;
mod ipc;
mod metrics;
mod publisher;
mod schema;
mod status;
mod util;
mod wire;

use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use rustls::crypto::{CryptoProvider, ring};

use collector::supervisor::Supervisor;
use config::Config;
use publisher::Publisher;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Initialize logging and the monotonic clock
// - Load configuration from the environment (the only fatal
//   error path; anything later recovers or degrades)
// - Start the supervisor and the status endpoint
// - Shut down cleanly on SIGINT
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, exactly once, as early as possible.
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    util::init_clock();

    let config = Config::from_env().context("configuration")?;
    info!(
        "gateway `{}` starting: {} venue(s), {} symbol(s), transport at {}",
        config.gateway_id,
        config.exchanges.iter().filter(|e| e.enabled).count(),
        config.symbols.len(),
        config.aeron_dir.display()
    );

    let publisher = Arc::new(Publisher::new(config.aeron_dir.clone()));
    let supervisor = Supervisor::start(&config, publisher);

    // The status endpoint is a passive reader; losing it does
    // not take the pipeline down.
    let status_shared = supervisor.shared();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = status::serve(metrics_port, status_shared).await {
            error!("status endpoint failed: {e}");
        }
    });

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutdown requested");
    supervisor.stop().await;

    Ok(())
}
