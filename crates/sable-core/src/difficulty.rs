//! Difficulty retargeting and emergency template easing.
//!
//! The retarget runs after every connected block over a rolling window of
//! the last [`DGW_WINDOW`](crate::constants::DGW_WINDOW) blocks
//! (Dark-Gravity-Wave style): the new target scales the current target by
//! the ratio of actual to expected timespan, with the timespan clamped to
//! ±[`MAX_DIFFICULTY_ADJUSTMENT`](crate::constants::MAX_DIFFICULTY_ADJUSTMENT)×
//! and the result clamped to the [hardest, easiest] target band.
//!
//! Separately, when no block has arrived for
//! [`EMERGENCY_THRESHOLD_SECS`](crate::constants::EMERGENCY_THRESHOLD_SECS),
//! the *template* target is multiplied by
//! [`EMERGENCY_EASING_FACTOR`](crate::constants::EMERGENCY_EASING_FACTOR)
//! per elapsed period so a depleted network can recover. The relaxation
//! never feeds back into the retarget state.

use primitive_types::U256;

use crate::compact::{bits_from_target, target_from_bits};
use crate::constants::{
    BLOCK_TIME_TARGET_SECS, DGW_WINDOW, EASIEST_BITS, EMERGENCY_EASING_FACTOR,
    EMERGENCY_THRESHOLD_SECS, HARDEST_BITS, MAX_DIFFICULTY_ADJUSTMENT,
};

/// Tuning knobs for the retarget. The defaults mirror the consensus
/// constants; tests and alternative networks may inject their own.
#[derive(Clone, Debug)]
pub struct DifficultyParams {
    pub window: u32,
    pub block_time_secs: u64,
    pub max_adjustment: u64,
    pub easiest_bits: u32,
    pub hardest_bits: u32,
    /// Milestone multipliers: at each `(height, factor)` the retargeted
    /// target is divided by `factor` (difficulty stepped up).
    pub milestones: Vec<(u32, u64)>,
}

impl Default for DifficultyParams {
    fn default() -> Self {
        Self {
            window: DGW_WINDOW,
            block_time_secs: BLOCK_TIME_TARGET_SECS,
            max_adjustment: MAX_DIFFICULTY_ADJUSTMENT,
            easiest_bits: EASIEST_BITS,
            hardest_bits: HARDEST_BITS,
            milestones: Vec::new(),
        }
    }
}

impl DifficultyParams {
    fn easiest_target(&self) -> U256 {
        // The clamp constants are canonical by construction.
        target_from_bits(self.easiest_bits).unwrap_or(U256::MAX)
    }

    fn hardest_target(&self) -> U256 {
        target_from_bits(self.hardest_bits).unwrap_or(U256::one())
    }

    fn milestone_factor(&self, height: u32) -> u64 {
        self.milestones
            .iter()
            .filter(|(h, _)| height >= *h)
            .map(|(_, f)| *f)
            .max()
            .unwrap_or(1)
    }
}

/// Compute the compact target for the block after a tip at `tip_height`.
///
/// `current_bits` is the retarget state after the tip. `timestamps` are
/// the window timestamps ordered oldest→newest, spanning the last
/// `window + 1` blocks (fewer on a young chain). Returns `current_bits`
/// unchanged when fewer than two timestamps are available.
pub fn next_bits(
    params: &DifficultyParams,
    current_bits: u32,
    timestamps: &[u32],
    tip_height: u32,
) -> u32 {
    if timestamps.len() < 2 {
        return current_bits;
    }
    let Ok(current_target) = target_from_bits(current_bits) else {
        return current_bits;
    };

    let intervals = (timestamps.len() - 1) as u64;
    let expected = intervals * params.block_time_secs;
    if expected == 0 {
        return current_bits;
    }

    let first = u64::from(timestamps[0]);
    let last = u64::from(timestamps[timestamps.len() - 1]);
    let actual = last.saturating_sub(first);

    // Clamp the timespan so one window moves difficulty at most 4×.
    let clamped = actual
        .max(expected / params.max_adjustment)
        .min(expected.saturating_mul(params.max_adjustment));

    // Scale by clamped/expected without overflowing 256 bits: the
    // quotient term saturates (and is then clamped to the easiest
    // target), the remainder term is small.
    let quotient = current_target / expected;
    let remainder = current_target % expected;
    let mut new_target = quotient
        .saturating_mul(U256::from(clamped))
        .saturating_add(remainder * clamped / expected);

    let factor = params.milestone_factor(tip_height + 1);
    if factor > 1 {
        new_target /= U256::from(factor);
    }

    new_target = new_target
        .min(params.easiest_target())
        .max(params.hardest_target());

    bits_from_target(new_target)
}

/// The compact target to write into a freshly produced template.
///
/// Starts from the retarget state and applies emergency easing: the
/// target is multiplied by 4 per full [`EMERGENCY_THRESHOLD_SECS`] period
/// elapsed since the tip timestamp, capped at the easiest target.
/// Accepted blocks are still validated against their own declared bits;
/// this only affects what templates advertise.
pub fn template_bits(
    params: &DifficultyParams,
    current_bits: u32,
    tip_timestamp: u32,
    now: u64,
) -> u32 {
    let idle = now.saturating_sub(u64::from(tip_timestamp));
    if idle <= EMERGENCY_THRESHOLD_SECS {
        return current_bits;
    }
    let Ok(target) = target_from_bits(current_bits) else {
        return current_bits;
    };

    let periods = (idle / EMERGENCY_THRESHOLD_SECS).min(128);
    let mut eased = target;
    let easiest = params.easiest_target();
    for _ in 0..periods {
        eased = eased.saturating_mul(U256::from(EMERGENCY_EASING_FACTOR));
        if eased >= easiest {
            eased = easiest;
            break;
        }
    }

    bits_from_target(eased.min(easiest))
}
