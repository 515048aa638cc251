//! Dynamic fee estimation.
//!
//! Combines three signals: the fee-rate distribution of the current
//! mempool (percentile per priority), the fill ratio of recent blocks,
//! and the median fee rate those blocks actually confirmed. Congestion
//! scales the floor; the result is clamped to
//! [[`MIN_FEE_RATE`](crate::constants::MIN_FEE_RATE),
//! [`MAX_FEE_RATE`](crate::constants::MAX_FEE_RATE)].
//!
//! Fee estimation is a policy surface, not consensus: floating point is
//! acceptable here and results are advisory.

use serde::{Deserialize, Serialize};

use crate::constants::{
    FEE_ESTIMATION_BLOCKS, MAX_BLOCK_SIZE, MAX_FEE_RATE, MIN_FEE_RATE, TYPICAL_TX_BYTES,
};

/// Confirmation urgency classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Fast,
    Normal,
    Economy,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Fast, Priority::Normal, Priority::Economy];

    fn multiplier(self) -> f64 {
        match self {
            Priority::Fast => 2.0,
            Priority::Normal => 1.0,
            Priority::Economy => 0.5,
        }
    }

    fn percentile(self) -> usize {
        match self {
            Priority::Fast => 90,
            Priority::Normal => 50,
            Priority::Economy => 20,
        }
    }

    /// Rough blocks-to-confirm, reported alongside the estimate.
    pub fn target_blocks(self) -> u32 {
        match self {
            Priority::Fast => 1,
            Priority::Normal => 3,
            Priority::Economy => 10,
        }
    }
}

/// A snapshot of the trailing blocks consulted by the estimator.
#[derive(Clone, Debug, Default)]
pub struct RecentBlockStats {
    /// Serialized size of each of the last ≤ [`FEE_ESTIMATION_BLOCKS`] blocks.
    pub block_sizes: Vec<usize>,
    /// Fee rates (base units/byte) of the non-coinbase transactions those
    /// blocks confirmed.
    pub accepted_fee_rates: Vec<u64>,
}

impl RecentBlockStats {
    /// Fraction of the maximum block size the window actually used.
    /// Defaults to 0.5 when no blocks are available.
    fn fill(&self) -> f64 {
        if self.block_sizes.is_empty() {
            return 0.5;
        }
        let total: usize = self.block_sizes.iter().sum();
        total as f64 / (self.block_sizes.len() as f64 * MAX_BLOCK_SIZE as f64)
    }

    fn median_accepted(&self) -> u64 {
        if self.accepted_fee_rates.is_empty() {
            return MIN_FEE_RATE;
        }
        let mut rates = self.accepted_fee_rates.clone();
        rates.sort_unstable();
        rates[rates.len() / 2]
    }
}

/// A fee recommendation for one priority class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub priority: Priority,
    /// Base units per byte.
    pub fee_rate: u64,
    /// Base units per kilobyte.
    pub fee_per_kb: u64,
    /// Absolute fee for a reference 250-byte transaction.
    pub estimated_fee: u64,
    pub target_blocks: u32,
}

/// Estimate the fee rate for one priority.
///
/// `mempool_rates` are the fee rates of current pool entries in any
/// order; `mempool_len` is the pool's entry count (usually
/// `mempool_rates.len()`, passed separately so callers can subsample).
pub fn estimate(
    priority: Priority,
    mempool_rates: &[u64],
    mempool_len: usize,
    recent: &RecentBlockStats,
) -> FeeEstimate {
    let mut sorted = mempool_rates.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a)); // descending

    let fill = recent.fill();
    let median_accepted = recent.median_accepted();

    // Congestion grows with pool depth past 100 entries and with blocks
    // running over 80% full.
    let mut congestion = 1.0f64;
    if mempool_len > 100 {
        congestion += (mempool_len - 100) as f64 / 100.0;
    }
    if fill > 0.8 {
        congestion += (fill - 0.8) * 5.0;
    }

    let base = (median_accepted as f64).max(MIN_FEE_RATE as f64 * congestion);
    let scaled = base * priority.multiplier();

    let rate = if sorted.is_empty() {
        scaled
    } else {
        let idx = ((100 - priority.percentile()) * sorted.len() / 100).min(sorted.len() - 1);
        (sorted[idx] as f64).max(scaled)
    };

    let fee_rate = (rate as u64).clamp(MIN_FEE_RATE, MAX_FEE_RATE);
    FeeEstimate {
        priority,
        fee_rate,
        fee_per_kb: fee_rate * 1000,
        estimated_fee: fee_rate * TYPICAL_TX_BYTES,
        target_blocks: priority.target_blocks(),
    }
}

/// Estimates for all three priorities from one snapshot.
pub fn estimate_all(
    mempool_rates: &[u64],
    mempool_len: usize,
    recent: &RecentBlockStats,
) -> [FeeEstimate; 3] {
    Priority::ALL.map(|p| estimate(p, mempool_rates, mempool_len, recent))
}

/// Cap the number of blocks a caller should feed into
/// [`RecentBlockStats`].
pub fn window_len(chain_height: u32) -> usize {
    FEE_ESTIMATION_BLOCKS.min(chain_height) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> RecentBlockStats {
        RecentBlockStats {
            block_sizes: vec![10_000; 10],
            accepted_fee_rates: vec![2, 3, 4],
        }
    }

    #[test]
    fn empty_everything_floors_at_minimum() {
        let est = estimate(Priority::Economy, &[], 0, &RecentBlockStats::default());
        assert_eq!(est.fee_rate, MIN_FEE_RATE);
        assert_eq!(est.fee_per_kb, MIN_FEE_RATE * 1000);
        assert_eq!(est.estimated_fee, MIN_FEE_RATE * TYPICAL_TX_BYTES);
    }

    #[test]
    fn priorities_are_ordered() {
        let rates: Vec<u64> = (1..=200).collect();
        let recent = quiet();
        let fast = estimate(Priority::Fast, &rates, rates.len(), &recent);
        let normal = estimate(Priority::Normal, &rates, rates.len(), &recent);
        let economy = estimate(Priority::Economy, &rates, rates.len(), &recent);
        assert!(fast.fee_rate >= normal.fee_rate);
        assert!(normal.fee_rate >= economy.fee_rate);
    }

    #[test]
    fn percentile_selects_from_sorted_mempool() {
        // 100 entries with rates 1..=100 descending-sorted internally.
        let rates: Vec<u64> = (1..=100).collect();
        let est = estimate(Priority::Fast, &rates, rates.len(), &quiet());
        // Fast = 90th percentile: index (100-90)*100/100 = 10 in the
        // descending list → rate 90.
        assert_eq!(est.fee_rate, 90);
    }

    #[test]
    fn congestion_from_pool_depth() {
        let recent = RecentBlockStats::default();
        let calm = estimate(Priority::Normal, &[], 50, &recent);
        let busy = estimate(Priority::Normal, &[], 600, &recent);
        // 600 entries → congestion 1 + 5 = 6 × MIN_FEE_RATE.
        assert!(busy.fee_rate > calm.fee_rate);
        assert_eq!(busy.fee_rate, 6);
    }

    #[test]
    fn congestion_from_block_fill() {
        let full = RecentBlockStats {
            block_sizes: vec![MAX_BLOCK_SIZE; 10],
            accepted_fee_rates: vec![],
        };
        let est = estimate(Priority::Normal, &[], 0, &full);
        // fill = 1.0 → congestion 1 + 0.2·5 = 2.
        assert_eq!(est.fee_rate, 2);
    }

    #[test]
    fn median_accepted_lifts_base() {
        let recent = RecentBlockStats {
            block_sizes: vec![1000; 10],
            accepted_fee_rates: vec![50, 60, 70],
        };
        let est = estimate(Priority::Normal, &[], 0, &recent);
        assert_eq!(est.fee_rate, 60);
    }

    #[test]
    fn clamped_to_max() {
        let recent = RecentBlockStats {
            block_sizes: vec![1000; 10],
            accepted_fee_rates: vec![u64::MAX / 2],
        };
        let est = estimate(Priority::Fast, &[], 0, &recent);
        assert_eq!(est.fee_rate, MAX_FEE_RATE);
    }

    #[test]
    fn estimate_all_returns_three() {
        let all = estimate_all(&[5, 10, 15], 3, &quiet());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].priority, Priority::Fast);
        assert_eq!(all[2].priority, Priority::Economy);
    }

    #[test]
    fn window_len_caps_at_configured_blocks() {
        assert_eq!(window_len(3), 3);
        assert_eq!(window_len(50), FEE_ESTIMATION_BLOCKS as usize);
    }
}
