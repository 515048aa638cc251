//! Sable Stratum pool server daemon.
//!
//! Runs an embedded full node and serves mining work over Stratum.
//! The pool signs payouts with the key given on the command line; its
//! payout address is derived from that key.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sable_core::crypto::KeyPair;
use sable_node::{Node, NodeConfig};
use sable_pool::{PoolConfig, PoolServer};

#[derive(Parser, Debug)]
#[command(name = "sable-pool", about = "Sable Stratum mining pool", version)]
struct Args {
    /// Data directory shared with the embedded node.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Stratum listen port.
    #[arg(long, default_value_t = sable_core::constants::DEFAULT_STRATUM_PORT)]
    port: u16,

    /// Pool signing key, 64 hex chars. Payouts are signed with this key
    /// and the pool address is derived from it.
    #[arg(long, env = "SABLE_POOL_KEY")]
    pool_key: String,

    /// Base pool fee in basis points (dynamic tiers override this).
    #[arg(long, default_value_t = 500)]
    fee_bps: u64,

    /// Disable the worker-count fee tiers.
    #[arg(long)]
    static_fee: bool,

    /// Log filter.
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

    let key_bytes = hex::decode(&args.pool_key).context("pool key is not hex")?;
    let key_bytes: [u8; 32] = match key_bytes.try_into() {
        Ok(bytes) => bytes,
        Err(_) => bail!("pool key must be exactly 32 bytes of hex"),
    };
    let pool_keypair = KeyPair::from_secret_bytes(&key_bytes).context("invalid pool key")?;

    let mut node_config = NodeConfig::default();
    if let Some(data_dir) = &args.data_dir {
        node_config.data_dir = data_dir.clone();
    }
    let state_path = node_config.data_dir.join("pool_state.json");
    let node = Node::open(node_config).context("opening node state")?;
    let maintenance = tokio::spawn(Arc::clone(&node).run_maintenance());

    let pool_config = PoolConfig {
        stratum_port: args.port,
        base_fee_bps: args.fee_bps,
        dynamic_fee: !args.static_fee,
        state_path,
        ..PoolConfig::default()
    };
    let server = PoolServer::new(pool_config, node.clone(), pool_keypair)
        .context("starting pool")?;
    info!(address = %server.pool_address(), port = args.port, "pool ready");

    let runner = tokio::spawn(Arc::clone(&server).run());

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    server.stop();
    let _ = runner.await;
    node.shutdown().context("persisting final state")?;
    maintenance.abort();
    Ok(())
}
