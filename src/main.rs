//! shardkeeper demo daemon
//!
//! Stands up a simulated host cluster, uploads a file, and churns host
//! membership to show the repair engine restoring redundancy. Useful for
//! watching the engine's behavior end to end; the library is the real
//! product.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shardkeeper::adapters::memory::{MemoryHostRegistry, MemoryLocalStore, MemoryTransport};
use shardkeeper::domain::LocalStore;
use shardkeeper::renter::{Renter, RenterConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// shardkeeper - erasure-coded redundancy repair demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of simulated hosts to start with
    #[arg(long, env = "HOSTS", default_value = "5")]
    hosts: usize,

    /// Data pieces (k)
    #[arg(long, env = "DATA_PIECES", default_value = "1")]
    data_pieces: usize,

    /// Parity pieces (m)
    #[arg(long, env = "PARITY_PIECES", default_value = "4")]
    parity_pieces: usize,

    /// Size of the demo file in bytes
    #[arg(long, env = "FILE_SIZE", default_value = "4194304")]
    file_size: usize,

    /// Host churn rounds to run
    #[arg(long, env = "CHURN_ROUNDS", default_value = "3")]
    churn_rounds: usize,

    /// Repair sweep interval in milliseconds
    #[arg(long, env = "SWEEP_INTERVAL_MS", default_value = "250")]
    sweep_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting shardkeeper demo");
    info!("  Hosts: {}", args.hosts);
    info!("  Split: {}+{}", args.data_pieces, args.parity_pieces);
    info!("  File size: {} bytes", args.file_size);
    info!("  Churn rounds: {}", args.churn_rounds);

    // Simulated cluster behind the domain ports.
    let registry = MemoryHostRegistry::new();
    registry.add_hosts(args.hosts);
    let transport = MemoryTransport::new(registry.clone());
    let local_store = MemoryLocalStore::new();

    let mut config = RenterConfig::default();
    config.repair.sweep_interval = Duration::from_millis(args.sweep_interval_ms);

    let renter = Renter::new(
        config,
        registry.clone(),
        transport,
        local_store.clone(),
    );

    // Seed and upload the demo file.
    let data: Vec<u8> = (0..args.file_size).map(|i| (i % 256) as u8).collect();
    local_store
        .write_local_copy("/demo/file", Bytes::from(data.clone()))
        .await
        .context("seeding local copy")?;

    let file = renter
        .upload_file_blocking(
            "/demo/file",
            args.data_pieces,
            args.parity_pieces,
            Duration::from_secs(60),
        )
        .await
        .context("uploading demo file")?;

    let info = renter.file_info(file).await?;
    info!(
        redundancy = info.redundancy,
        health = %info.health,
        "upload complete"
    );

    run_churn(&renter, &registry, file, args.churn_rounds).await?;

    // Final verification: the file still reconstructs byte-identical.
    let recovered = renter.download_file(file).await?;
    anyhow::ensure!(recovered == data, "downloaded bytes differ from source");
    info!("download verified after churn");

    renter.shutdown().await;
    Ok(())
}

/// Remove and replace one host per round, waiting out the degradation and
/// the repair each time.
async fn run_churn(
    renter: &Arc<Renter>,
    registry: &Arc<MemoryHostRegistry>,
    file: shardkeeper::FileId,
    rounds: usize,
) -> anyhow::Result<()> {
    let target = renter.file_info(file).await?.redundancy;

    for round in 1..=rounds {
        let victim = *registry
            .live_snapshot()
            .iter()
            .next()
            .context("no live hosts left")?;
        registry.remove_host(victim);

        renter
            .wait_for_redundancy_below(file, target, Duration::from_secs(30))
            .await
            .context("degradation was not detected")?;
        let degraded = renter.file_redundancy(file).await?;
        info!(round, redundancy = degraded, "host lost, redundancy degraded");

        registry.add_host();
        renter
            .wait_for_redundancy_at_least(file, target, Duration::from_secs(30))
            .await
            .context("repair did not restore redundancy")?;
        info!(round, redundancy = target, "repair restored redundancy");
    }
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
