//! Block validation: the ordered consensus checks.
//!
//! [`validate_block`] runs the full acceptance sequence against a
//! [`ValidationContext`] supplied by the chain store: height linkage,
//! parent hash, median-time-past and future-time bounds, proof of work,
//! merkle commitment, coinbase position, per-transaction UTXO validation
//! with intra-block resolution and double-spend tracking, the coinbase
//! reward bound, and the size cap. Checks run in this order and the first
//! failure is returned as a typed [`BlockError`].
//!
//! The genesis block (height 0) is not validated through this module.

use std::collections::{HashMap, HashSet};

use crate::compact::{hash_to_u256, target_from_bits};
use crate::constants::{MAX_BLOCK_SIZE, MAX_FUTURE_BLOCK_TIME, MTP_WINDOW};
use crate::error::BlockError;
use crate::merkle;
use crate::reward;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, UtxoEntry};
use crate::validation;

/// Chain-state inputs to block validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationContext {
    /// Height the block must claim (`tip.height + 1`).
    pub expected_height: u32,
    /// Hash the block's `prev_hash` must equal (the tip hash).
    pub prev_hash: Hash256,
    /// Median time past of the trailing window.
    pub mtp: u32,
    /// Wall-clock now, Unix seconds.
    pub now: u64,
}

/// Summary of a successfully validated block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBlock {
    /// Sum of all non-coinbase transaction fees.
    pub total_fees: u64,
    /// Total value of the coinbase outputs.
    pub coinbase_value: u64,
}

/// Median time past over a window of trailing block timestamps
/// (oldest→newest, at most the last [`MTP_WINDOW`] blocks).
///
/// Chains shorter than the window fall back to the tip timestamp.
pub fn median_time_past(timestamps: &[u32]) -> u32 {
    if timestamps.is_empty() {
        return 0;
    }
    if timestamps.len() < MTP_WINDOW {
        return *timestamps.last().expect("non-empty");
    }
    let mut window: Vec<u32> = timestamps[timestamps.len() - MTP_WINDOW..].to_vec();
    window.sort_unstable();
    window[window.len() / 2]
}

/// Check a header's proof of work against its own declared bits.
pub fn check_pow(header: &BlockHeader) -> Result<(), BlockError> {
    let target = target_from_bits(header.bits)?;
    if hash_to_u256(&header.hash()) < target {
        Ok(())
    } else {
        Err(BlockError::BadPoW)
    }
}

/// Recompute the merkle root and compare it to the header commitment.
/// Also rejects duplicate txids, which would allow identical-root forgeries.
pub fn check_merkle(block: &Block) -> Result<Vec<Hash256>, BlockError> {
    let mut txids = Vec::with_capacity(block.transactions.len());
    let mut seen = HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        let txid = tx.txid();
        if !seen.insert(txid) {
            return Err(BlockError::DuplicateTxid(txid.to_string()));
        }
        txids.push(txid);
    }
    if merkle::merkle_root(&txids) != block.header.merkle_root {
        return Err(BlockError::BadMerkle);
    }
    Ok(txids)
}

/// Validate a block against the chain state.
///
/// `get_utxo` resolves outpoints from the state *before* this block;
/// outputs created by earlier transactions within the block are layered
/// on top, so intra-block chains are legal.
pub fn validate_block<F>(
    block: &Block,
    context: &ValidationContext,
    get_utxo: F,
) -> Result<ValidatedBlock, BlockError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
{
    // --- 1. Height ---

    if block.height != context.expected_height {
        return Err(BlockError::InvalidHeight {
            expected: context.expected_height,
            got: block.height,
        });
    }

    // --- 2. Parent ---

    if block.header.prev_hash != context.prev_hash {
        return Err(BlockError::BadParent {
            expected: context.prev_hash.to_string(),
            got: block.header.prev_hash.to_string(),
        });
    }

    // --- 3. Time lower bound (strictly after MTP) ---

    if block.header.timestamp <= context.mtp {
        return Err(BlockError::TimestampBeforeMtp {
            timestamp: block.header.timestamp,
            mtp: context.mtp,
        });
    }

    // --- 4. Time upper bound ---

    let limit = context.now.saturating_add(MAX_FUTURE_BLOCK_TIME);
    if u64::from(block.header.timestamp) > limit {
        return Err(BlockError::TimestampTooFar {
            timestamp: block.header.timestamp,
            limit: limit.min(u64::from(u32::MAX)) as u32,
        });
    }

    // --- 5. Proof of work ---

    check_pow(&block.header)?;

    // --- 6. Merkle commitment ---

    let txids = check_merkle(block)?;

    // --- 7. Coinbase position ---

    let Some(first) = block.transactions.first() else {
        return Err(BlockError::BadCoinbasePosition("empty block".into()));
    };
    if !first.is_coinbase() {
        return Err(BlockError::BadCoinbasePosition(
            "first transaction is not coinbase".into(),
        ));
    }
    for tx in block.transactions.iter().skip(1) {
        if tx.is_coinbase() {
            return Err(BlockError::BadCoinbasePosition(
                "multiple coinbase transactions".into(),
            ));
        }
    }
    validation::validate_transaction_structure(first)
        .map_err(|source| BlockError::Transaction { index: 0, source })?;

    // --- 8. Per-transaction validation ---

    // Outputs created by earlier transactions of this block, spendable by
    // later ones; outpoints consumed so far, rejecting double spends.
    let mut block_created: HashMap<OutPoint, UtxoEntry> = HashMap::new();
    let mut block_spent: HashSet<OutPoint> = HashSet::new();
    let mut total_fees: u64 = 0;

    for (index, output) in first.outputs.iter().enumerate() {
        block_created.insert(
            OutPoint { txid: txids[0], index: index as u32 },
            UtxoEntry {
                output: output.clone(),
                height: block.height,
                is_coinbase: true,
            },
        );
    }

    for (i, tx) in block.transactions.iter().enumerate().skip(1) {
        for input in &tx.inputs {
            if block_spent.contains(&input.prev) {
                return Err(BlockError::DoubleSpend(input.prev.to_string()));
            }
        }

        let resolver = |op: &OutPoint| {
            if block_spent.contains(op) {
                return None;
            }
            block_created.get(op).cloned().or_else(|| get_utxo(op))
        };

        let validated = validation::validate_transaction(tx, resolver, block.height, true)
            .map_err(|source| BlockError::Transaction { index: i, source })?;

        total_fees = total_fees
            .checked_add(validated.fee)
            .ok_or(BlockError::Transaction {
                index: i,
                source: crate::error::TransactionError::ValueOverflow,
            })?;

        for input in &tx.inputs {
            block_spent.insert(input.prev);
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            block_created.insert(
                OutPoint { txid: txids[i], index: index as u32 },
                UtxoEntry {
                    output: output.clone(),
                    height: block.height,
                    is_coinbase: false,
                },
            );
        }
    }

    // --- 9. Coinbase reward bound ---

    let coinbase_value = first
        .total_output_value()
        .ok_or(BlockError::Transaction {
            index: 0,
            source: crate::error::TransactionError::ValueOverflow,
        })?;
    let allowed = reward::subsidy(block.height)
        .checked_add(total_fees)
        .ok_or(BlockError::CoinbaseOverpay {
            got: coinbase_value,
            allowed: u64::MAX,
        })?;
    if coinbase_value > allowed {
        return Err(BlockError::CoinbaseOverpay {
            got: coinbase_value,
            allowed,
        });
    }

    // --- 10. Size ---

    let size = block.serialized_size();
    if size > MAX_BLOCK_SIZE {
        return Err(BlockError::Oversized {
            size,
            max: MAX_BLOCK_SIZE,
        });
    }

    Ok(ValidatedBlock {
        total_fees,
        coinbase_value,
    })
}
