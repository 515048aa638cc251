//! In-memory pool of unconfirmed transactions.
//!
//! Admission is UTXO-aware: every input must resolve against the chain
//! or against another pool entry, immature coinbase spends are refused,
//! and a claimed-outpoint index rejects in-pool double spends. The claim
//! index is updated in the same call as the entry map, so the two are
//! always consistent.
//!
//! Entries expire after a configurable TTL (0 = never) and are removed
//! when a block confirms them or spends their inputs. Block template
//! selection is fee-rate ordered and deterministic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MEMPOOL_TTL_SECS, MAX_MEMPOOL_BYTES};
use crate::error::MempoolError;
use crate::types::{Block, Hash256, OutPoint, Transaction, UtxoEntry};
use crate::validation;

/// A transaction held in the pool with its admission metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    /// Fee resolved at admission time.
    pub fee: u64,
    /// Canonical serialized size in bytes.
    pub size: usize,
    /// Unix seconds when the entry was admitted.
    pub admitted_at: u64,
}

impl MempoolEntry {
    /// Fee rate in milli-base-units per byte (scaled ×1000 for ordering
    /// precision).
    pub fn fee_rate_millis(&self) -> u64 {
        if self.size == 0 {
            return u64::MAX;
        }
        ((self.fee as u128) * 1000 / (self.size as u128)).min(u64::MAX as u128) as u64
    }

    /// Fee rate in whole base units per byte (estimator granularity).
    pub fn fee_rate(&self) -> u64 {
        self.fee / (self.size.max(1) as u64)
    }
}

/// The unconfirmed transaction pool.
///
/// Not thread-safe; callers wrap it in a `Mutex`.
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    /// Outpoint → txid of the pool entry spending it.
    claimed: HashMap<OutPoint, Hash256>,
    total_bytes: usize,
    max_bytes: usize,
    /// Entry lifetime in seconds; 0 means entries never expire.
    ttl_secs: u64,
}

impl Mempool {
    pub fn new(max_bytes: usize, ttl_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            claimed: HashMap::new(),
            total_bytes: 0,
            max_bytes,
            ttl_secs,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MAX_MEMPOOL_BYTES, DEFAULT_MEMPOOL_TTL_SECS)
    }

    /// Admit a transaction.
    ///
    /// `get_chain_utxo` resolves outpoints against confirmed, unspent
    /// chain state; outputs of other pool entries are layered on top.
    /// `spend_height` is the earliest height the transaction could
    /// confirm at (chain tip + 1), used for the maturity check. `trusted`
    /// skips signature verification when re-admitting transactions that
    /// validated once (disk load, reorg eviction).
    pub fn add<F>(
        &mut self,
        tx: Transaction,
        get_chain_utxo: F,
        spend_height: u32,
        now: u64,
        trusted: bool,
    ) -> Result<Hash256, MempoolError>
    where
        F: Fn(&OutPoint) -> Option<UtxoEntry>,
    {
        let txid = tx.txid();

        // 1. Duplicates.
        if self.entries.contains_key(&txid) {
            return Err(MempoolError::Duplicate(txid.to_string()));
        }

        // 2. Coinbase shape is never relayed.
        if tx.is_coinbase() {
            return Err(MempoolError::CoinbaseShape);
        }

        // 3. Byte cap. No eviction policy beyond TTL.
        let size = tx.serialized_size();
        if self.total_bytes + size > self.max_bytes {
            return Err(MempoolError::PoolFull);
        }

        // 4–5. In-pool double spends, then full contextual validation
        // with pool parents layered over the chain.
        for input in &tx.inputs {
            if let Some(existing) = self.claimed.get(&input.prev) {
                return Err(MempoolError::DoubleSpend {
                    outpoint: input.prev.to_string(),
                    existing_txid: existing.to_string(),
                });
            }
        }

        let resolver = |op: &OutPoint| {
            get_chain_utxo(op).or_else(|| {
                self.entries.get(&op.txid).and_then(|parent| {
                    parent.tx.outputs.get(op.index as usize).map(|output| UtxoEntry {
                        output: output.clone(),
                        height: spend_height,
                        is_coinbase: false,
                    })
                })
            })
        };
        let validated = validation::validate_transaction(&tx, resolver, spend_height, !trusted)?;

        // 6. Commit: claims and entry together.
        for input in &tx.inputs {
            self.claimed.insert(input.prev, txid);
        }
        self.total_bytes += size;
        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                txid,
                fee: validated.fee,
                size,
                admitted_at: now,
            },
        );
        Ok(txid)
    }

    /// Remove an entry, releasing its outpoint claims.
    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.inputs {
            if self.claimed.get(&input.prev) == Some(txid) {
                self.claimed.remove(&input.prev);
            }
        }
        self.total_bytes -= entry.size;
        Some(entry)
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// Is this outpoint claimed by a pool entry?
    pub fn is_claimed(&self, outpoint: &OutPoint) -> bool {
        self.claimed.contains_key(outpoint)
    }

    /// Select transactions for a block template: fee-rate descending,
    /// ties broken by ascending txid, greedily skipping entries that
    /// would exceed the byte budget. Deterministic for a given snapshot.
    pub fn select_for_block(&self, max_bytes: usize) -> Vec<&MempoolEntry> {
        let mut candidates: Vec<&MempoolEntry> = self.entries.values().collect();
        candidates.sort_by(|a, b| {
            // fee_a/size_a vs fee_b/size_b, cross-multiplied to avoid
            // integer truncation biasing the order.
            let lhs = (b.fee as u128) * (a.size as u128);
            let rhs = (a.fee as u128) * (b.size as u128);
            lhs.cmp(&rhs).then_with(|| a.txid.cmp(&b.txid))
        });

        let mut selected = Vec::new();
        let mut used = 0usize;
        for entry in candidates {
            if used + entry.size > max_bytes {
                continue;
            }
            used += entry.size;
            selected.push(entry);
        }
        selected
    }

    /// Drop entries older than the TTL. Returns the expired txids.
    /// A TTL of zero disables expiry.
    pub fn prune_expired(&mut self, now: u64) -> Vec<Hash256> {
        if self.ttl_secs == 0 {
            return Vec::new();
        }
        let expired: Vec<Hash256> = self
            .entries
            .values()
            .filter(|e| now.saturating_sub(e.admitted_at) > self.ttl_secs)
            .map(|e| e.txid)
            .collect();
        for txid in &expired {
            self.remove(txid);
        }
        expired
    }

    /// Remove transactions confirmed by `block` and any entries whose
    /// inputs the block spent out from under them.
    pub fn remove_confirmed(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.remove(&tx.txid());
        }
        let conflicting: Vec<Hash256> = block
            .transactions
            .iter()
            .flat_map(|tx| tx.inputs.iter())
            .filter(|input| !input.prev.is_null())
            .filter_map(|input| self.claimed.get(&input.prev).copied())
            .collect();
        for txid in conflicting {
            self.remove(&txid);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    /// Fee rates (base units per byte) of all entries, unordered.
    pub fn fee_rates(&self) -> Vec<u64> {
        self.entries.values().map(|e| e.fee_rate()).collect()
    }
}
