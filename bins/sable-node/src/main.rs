//! Sable full node daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sable_node::{Node, NodeConfig};

#[derive(Parser, Debug)]
#[command(name = "sable-node", about = "Sable full node", version)]
struct Args {
    /// Data directory for chain and mempool state.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Mempool entry TTL in seconds (0 = never expire).
    #[arg(long)]
    mempool_ttl: Option<u64>,

    /// Log filter, e.g. "info" or "sable_node=debug".
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config = NodeConfig {
        log_level: args.log_level.clone(),
        ..NodeConfig::default()
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(ttl) = args.mempool_ttl {
        config.mempool_ttl_secs = ttl;
    }

    info!(data_dir = %config.data_dir.display(), "starting sable-node");
    let node = Node::open(config).context("opening node state")?;

    let maintenance = tokio::spawn(Arc::clone(&node).run_maintenance());

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    node.shutdown().context("persisting final state")?;
    maintenance.abort();
    Ok(())
}
