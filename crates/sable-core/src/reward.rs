//! Block subsidy schedule.
//!
//! The subsidy starts at [`INITIAL_REWARD`](crate::constants::INITIAL_REWARD)
//! (100 SBL), halves every [`HALVING_INTERVAL`](crate::constants::HALVING_INTERVAL)
//! blocks, and never falls below [`MIN_REWARD`](crate::constants::MIN_REWARD)
//! (1 SBL) — unlike Bitcoin, the tail emission is perpetual.

use crate::constants::{HALVING_INTERVAL, INITIAL_REWARD, MIN_REWARD};

/// The block subsidy (in base units) for a given height:
/// `max(INITIAL_REWARD >> (height / HALVING_INTERVAL), MIN_REWARD)`.
pub fn subsidy(height: u32) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return MIN_REWARD;
    }
    (INITIAL_REWARD >> halvings).max(MIN_REWARD)
}

/// Which halving epoch a height falls in.
pub fn halving_epoch(height: u32) -> u32 {
    height / HALVING_INTERVAL
}
