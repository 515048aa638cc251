//! Node configuration.

use std::path::PathBuf;

use sable_core::constants::{DEFAULT_MEMPOOL_TTL_SECS, MAX_MEMPOOL_BYTES};

/// Configuration for a full node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for persistent state.
    pub data_dir: PathBuf,
    /// Mempool entry lifetime in seconds (0 = never expire).
    pub mempool_ttl_secs: u64,
    /// Mempool byte cap.
    pub mempool_max_bytes: usize,
    /// Seconds between periodic persistence passes.
    pub persist_interval_secs: u64,
    /// Log level filter string (e.g. "info", "sable_node=debug").
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sable");
        Self {
            data_dir,
            mempool_ttl_secs: DEFAULT_MEMPOOL_TTL_SECS,
            mempool_max_bytes: MAX_MEMPOOL_BYTES,
            persist_interval_secs: 60,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join("chain.dat")
    }

    pub fn mempool_path(&self) -> PathBuf {
        self.data_dir.join("mempool.json")
    }
}
