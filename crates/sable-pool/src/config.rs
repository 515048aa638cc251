//! Pool server configuration.

use std::path::PathBuf;

use sable_core::constants::{DEFAULT_STRATUM_PORT, MIN_PAYOUT};

/// Configuration for a pool instance.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Bind address for the Stratum listener.
    pub stratum_bind: String,
    /// Stratum TCP port.
    pub stratum_port: u16,
    /// Base pool fee in basis points, used when the dynamic fee is off.
    pub base_fee_bps: u64,
    /// Scale the fee down as authorized workers grow.
    pub dynamic_fee: bool,
    /// Minimum accrued balance before a payout is attempted.
    pub min_payout: u64,
    /// Seconds between job refresh polls.
    pub job_refresh_secs: u64,
    /// Seconds between payout cycles.
    pub payout_interval_secs: u64,
    /// Worker connections idle past this many seconds are culled
    /// (a keepalive ping goes out at half this interval).
    pub idle_timeout_secs: u64,
    /// Ledger state file.
    pub state_path: PathBuf,
    /// Miner tag embedded in coinbase scripts.
    pub coinbase_tag: Vec<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            stratum_bind: "0.0.0.0".to_string(),
            stratum_port: DEFAULT_STRATUM_PORT,
            base_fee_bps: 500,
            dynamic_fee: true,
            min_payout: MIN_PAYOUT,
            job_refresh_secs: 5,
            payout_interval_secs: 300,
            idle_timeout_secs: 300,
            state_path: PathBuf::from("data/pool_state.json"),
            coinbase_tag: b"sable-pool".to_vec(),
        }
    }
}

impl PoolConfig {
    pub fn stratum_addr(&self) -> String {
        format!("{}:{}", self.stratum_bind, self.stratum_port)
    }
}
