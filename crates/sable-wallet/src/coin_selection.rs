//! Coin selection over mature UTXOs.
//!
//! Largest-first greedy accumulation: sort spendable outputs by value
//! descending and take until the target plus fee is covered. This keeps
//! input counts (and therefore fees) small for typical payouts.

use sable_core::types::{OutPoint, UtxoEntry};

use crate::error::WalletError;

/// A spendable output annotated with its outpoint.
#[derive(Debug, Clone)]
pub struct WalletUtxo {
    pub outpoint: OutPoint,
    pub entry: UtxoEntry,
}

/// Result of coin selection.
#[derive(Debug, Clone)]
pub struct CoinSelection {
    /// UTXOs to spend, in selection order.
    pub selected: Vec<WalletUtxo>,
    /// Total value of the selected inputs.
    pub total_input: u64,
    /// Change returned to the sender (0 when it would be dust).
    pub change: u64,
    /// Fee actually paid (includes folded-in dust change).
    pub fee: u64,
}

/// Change below this many base units folds into the fee instead of
/// producing an output.
pub const DUST_LIMIT: u64 = 1_000;

/// Select UTXOs covering `target + fee`.
///
/// `candidates` must already be filtered for maturity (the chain view's
/// spendable set). Returns [`WalletError::InsufficientFunds`] when the
/// pool cannot cover the spend.
pub fn select_coins(
    mut candidates: Vec<WalletUtxo>,
    target: u64,
    fee: u64,
) -> Result<CoinSelection, WalletError> {
    let needed = target
        .checked_add(fee)
        .ok_or(WalletError::InsufficientFunds { have: 0, need: u64::MAX })?;

    candidates.sort_by(|a, b| {
        b.entry
            .output
            .value
            .cmp(&a.entry.output.value)
            .then_with(|| a.outpoint.cmp(&b.outpoint))
    });

    let mut selected = Vec::new();
    let mut total_input: u64 = 0;
    for utxo in candidates {
        if total_input >= needed {
            break;
        }
        total_input = total_input.saturating_add(utxo.entry.output.value);
        selected.push(utxo);
    }

    if total_input < needed {
        return Err(WalletError::InsufficientFunds {
            have: total_input,
            need: needed,
        });
    }

    let mut change = total_input - needed;
    let mut fee = fee;
    if change > 0 && change < DUST_LIMIT {
        fee += change;
        change = 0;
    }

    Ok(CoinSelection {
        selected,
        total_input,
        change,
        fee,
    })
}
