//! The consensus engine: block acceptance, template production, and
//! chain-work reorganization.
//!
//! Wires sable-core's validation, difficulty, and reward modules to the
//! chain store and mempool. The engine is the only writer of the chain
//! store; every mutation enters through [`ConsensusEngine::add_block`] or
//! [`ConsensusEngine::try_reorganize`], each of which holds the coarse
//! store lock for the duration of the mutation.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use primitive_types::U256;
use tracing::{debug, info, warn};

use sable_core::block_validation::{self, ValidatedBlock};
use sable_core::chain::ChainStore;
use sable_core::constants::{MAX_BLOCK_SIZE, MAX_REORG_DEPTH};
use sable_core::difficulty;
use sable_core::error::{BlockError, ChainError, MempoolError, SableError};
use sable_core::fees::{self, FeeEstimate, Priority, RecentBlockStats};
use sable_core::mempool::Mempool;
use sable_core::merkle;
use sable_core::reward;
use sable_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};
use sable_core::validation::coinbase_script_sig;

/// Room reserved in a template for the coinbase transaction.
const TEMPLATE_COINBASE_RESERVE: usize = 1_000;

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

/// Outcome of handing a block to [`ConsensusEngine::add_block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedBlock {
    pub hash: Hash256,
    pub height: u32,
    pub total_fees: u64,
}

/// Block acceptance pipeline and fork choice.
pub struct ConsensusEngine {
    store: Arc<RwLock<ChainStore>>,
    mempool: Arc<Mutex<Mempool>>,
    clock: Clock,
}

impl ConsensusEngine {
    /// Create an engine over a store and mempool, using the system clock.
    pub fn new(store: Arc<RwLock<ChainStore>>, mempool: Arc<Mutex<Mempool>>) -> Self {
        Self::with_clock(store, mempool, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })
    }

    /// Create an engine with an injected clock (tests).
    pub fn with_clock(
        store: Arc<RwLock<ChainStore>>,
        mempool: Arc<Mutex<Mempool>>,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            mempool,
            clock: Box::new(clock),
        }
    }

    pub fn store(&self) -> &Arc<RwLock<ChainStore>> {
        &self.store
    }

    pub fn mempool(&self) -> &Arc<Mutex<Mempool>> {
        &self.mempool
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    // ------------------------------------------------------------------
    // Block acceptance
    // ------------------------------------------------------------------

    /// Validate a block against the current tip and commit it.
    ///
    /// On success the block's transactions leave the mempool and the
    /// difficulty state advances. Validation errors leave every piece of
    /// state untouched.
    pub fn add_block(&self, block: Block) -> Result<AcceptedBlock, SableError> {
        let mut store = self.store.write();

        let context = store.validation_context(self.now());
        let validated: ValidatedBlock =
            block_validation::validate_block(&block, &context, |op| store.get_utxo(op))
                .map_err(SableError::Block)?;

        let hash = block.hash();
        let height = block.height;
        let mempool_view = block.clone();
        store.connect_block(block).map_err(SableError::Chain)?;

        self.mempool.lock().remove_confirmed(&mempool_view);

        info!(height, %hash, fees = validated.total_fees, "block connected");
        Ok(AcceptedBlock {
            hash,
            height,
            total_fees: validated.total_fees,
        })
    }

    /// Admit a transaction to the mempool, resolving against the chain.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, MempoolError> {
        let store = self.store.read();
        let spend_height = store.height() + 1;
        self.mempool
            .lock()
            .add(tx, |op| store.get_utxo(op), spend_height, self.now(), false)
    }

    // ------------------------------------------------------------------
    // Reorganization
    // ------------------------------------------------------------------

    /// Switch to `candidate` if it is a contiguous fork with strictly
    /// more work than the suffix it replaces.
    ///
    /// The candidate's first block must claim a parent already in the
    /// store. Rollback deeper than
    /// [`MAX_REORG_DEPTH`](sable_core::constants::MAX_REORG_DEPTH) is
    /// refused regardless of work; ties keep the current chain
    /// (first-seen wins). Evicted non-coinbase transactions return to the
    /// mempool without signature re-verification.
    pub fn try_reorganize(&self, candidate: Vec<Block>) -> Result<(), SableError> {
        let mut store = self.store.write();

        let first = candidate
            .first()
            .ok_or_else(|| ChainError::BadFork("empty candidate chain".into()))?;
        if first.height == 0 {
            return Err(ChainError::BadFork("candidate replaces genesis".into()).into());
        }

        let common_height = first.height - 1;
        let tip_height = store.height();
        if common_height > tip_height {
            return Err(ChainError::BadFork(format!(
                "fork point {common_height} beyond tip {tip_height}"
            ))
            .into());
        }

        let depth = tip_height - common_height;
        if depth > MAX_REORG_DEPTH {
            return Err(ChainError::ReorgTooDeep {
                depth,
                max: MAX_REORG_DEPTH,
            }
            .into());
        }

        let ancestor = store
            .block_at(common_height)
            .expect("height bounded by tip");
        if first.header.prev_hash != ancestor.hash() {
            return Err(ChainError::BadFork("candidate does not attach to our chain".into()).into());
        }

        // Contiguity plus PoW and merkle on every candidate block.
        let mut expected_height = first.height;
        let mut expected_parent = first.header.prev_hash;
        for block in &candidate {
            if block.height != expected_height || block.header.prev_hash != expected_parent {
                return Err(ChainError::BadFork("candidate chain not contiguous".into()).into());
            }
            block_validation::check_pow(&block.header).map_err(SableError::Block)?;
            block_validation::check_merkle(block).map_err(SableError::Block)?;
            expected_height += 1;
            expected_parent = block.hash();
        }

        // Strictly more work or we keep what we have.
        let current_suffix: Vec<Block> = store.blocks_from(common_height + 1).to_vec();
        let current_work = ChainStore::sequence_work(&current_suffix);
        let candidate_work = ChainStore::sequence_work(&candidate);
        if candidate_work <= current_work {
            debug!(
                %current_work,
                %candidate_work,
                "keeping current chain"
            );
            return Err(ChainError::ReorgNoGain.into());
        }

        warn!(
            depth,
            gained_blocks = candidate.len(),
            "chain reorganization"
        );

        // Roll back to the ancestor, deepest block first off the tip.
        let mut evicted: Vec<Block> = Vec::with_capacity(depth as usize);
        while store.height() > common_height {
            evicted.push(store.disconnect_tip().map_err(SableError::Chain)?);
        }

        // Apply the candidate suffix; on any failure restore the old chain.
        let mut applied = 0usize;
        let mut failure: Option<SableError> = None;
        for block in &candidate {
            match store.connect_block(block.clone()) {
                Ok(()) => applied += 1,
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            }
        }

        if let Some(err) = failure {
            for _ in 0..applied {
                store.disconnect_tip().map_err(SableError::Chain)?;
            }
            for block in evicted.into_iter().rev() {
                store.connect_block(block).map_err(SableError::Chain)?;
            }
            store.recompute_total_work();
            return Err(err);
        }

        store.recompute_total_work();

        // Return evicted non-coinbase transactions to the mempool,
        // oldest first so in-pool parents resolve. They validated once;
        // signatures are not re-checked. Conflicts with the new chain
        // fall out naturally.
        let spend_height = store.height() + 1;
        let now = self.now();
        let mut mempool = self.mempool.lock();
        // Pool entries the candidate suffix confirmed (or conflicted
        // with) leave first, exactly as in add_block.
        for block in &candidate {
            mempool.remove_confirmed(block);
        }
        for block in evicted.iter().rev() {
            for tx in block.transactions.iter().skip(1) {
                if let Err(e) = mempool.add(
                    tx.clone(),
                    |op| store.get_utxo(op),
                    spend_height,
                    now,
                    true,
                ) {
                    debug!(txid = %tx.txid(), error = %e, "evicted tx not restored");
                }
            }
        }

        info!(height = store.height(), work = %store.total_work(), "reorganization complete");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Template production
    // ------------------------------------------------------------------

    /// Build a mining template on the current tip.
    ///
    /// The coinbase pays `subsidy + fees` to `payout_script`; mempool
    /// transactions are taken fee-rate first and re-checked against the
    /// store so a stale pool entry can never invalidate the template.
    /// The advertised bits include emergency easing when the tip is
    /// stale.
    pub fn block_template(&self, payout_script: Vec<u8>, tag: &[u8]) -> BlockTemplate {
        let store = self.store.read();
        let mempool = self.mempool.lock();

        let tip = store.tip();
        let height = tip.height + 1;
        let now = self.now();
        let bits = difficulty::template_bits(
            store.params(),
            store.current_bits(),
            tip.header.timestamp,
            now,
        );

        // Timestamp: past the MTP and never behind the wall clock.
        let context = store.validation_context(now);
        let timestamp = (now as u32).max(context.mtp + 1);

        // Fee-rate-ordered candidates, re-validated against the store
        // with intra-template double-spend tracking.
        let mut included: Vec<Transaction> = Vec::new();
        let mut spent: std::collections::HashSet<OutPoint> = std::collections::HashSet::new();
        let mut block_fees: u64 = 0;
        let mut used_bytes = 0usize;
        let budget = MAX_BLOCK_SIZE - TEMPLATE_COINBASE_RESERVE;

        for entry in mempool.select_for_block(budget) {
            if used_bytes + entry.size > budget {
                continue;
            }
            let mut input_value: u64 = 0;
            let mut ok = true;
            for input in &entry.tx.inputs {
                if spent.contains(&input.prev) {
                    ok = false;
                    break;
                }
                match store.get_utxo(&input.prev) {
                    Some(utxo) if utxo.is_mature(height) => {
                        input_value = match input_value.checked_add(utxo.output.value) {
                            Some(v) => v,
                            None => {
                                ok = false;
                                break;
                            }
                        };
                    }
                    _ => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                continue;
            }
            let output_value = match entry.tx.total_output_value() {
                Some(v) if v <= input_value => v,
                _ => continue,
            };

            for input in &entry.tx.inputs {
                spent.insert(input.prev);
            }
            block_fees = block_fees.saturating_add(input_value - output_value);
            used_bytes += entry.size;
            included.push(entry.tx.clone());
        }

        let reward = reward::subsidy(height).saturating_add(block_fees);
        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::null(),
                script_sig: coinbase_script_sig(height, tag),
                sequence: 0xFFFF_FFFF,
                prev_output: None,
            }],
            outputs: vec![TxOutput {
                value: reward,
                script_pubkey: payout_script,
            }],
            locktime: 0,
        };

        let mut transactions = Vec::with_capacity(1 + included.len());
        transactions.push(coinbase);
        transactions.extend(included);
        let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();

        let block = Block {
            height,
            header: BlockHeader {
                version: 1,
                prev_hash: tip.hash(),
                merkle_root: merkle::merkle_root(&txids),
                timestamp,
                bits,
                nonce: 0,
            },
            transactions,
        };

        BlockTemplate {
            block,
            reward,
            fees: block_fees,
        }
    }

    // ------------------------------------------------------------------
    // Fee estimation
    // ------------------------------------------------------------------

    /// Fee estimates for all priorities from the current mempool and the
    /// trailing blocks.
    pub fn fee_estimates(&self) -> [FeeEstimate; 3] {
        let store = self.store.read();
        let mempool = self.mempool.lock();
        let recent = Self::recent_block_stats(&store);
        fees::estimate_all(&mempool.fee_rates(), mempool.len(), &recent)
    }

    /// Fee estimate for one priority.
    pub fn fee_estimate(&self, priority: Priority) -> FeeEstimate {
        let store = self.store.read();
        let mempool = self.mempool.lock();
        let recent = Self::recent_block_stats(&store);
        fees::estimate(priority, &mempool.fee_rates(), mempool.len(), &recent)
    }

    fn recent_block_stats(store: &ChainStore) -> RecentBlockStats {
        let window = fees::window_len(store.height());
        if window == 0 {
            return RecentBlockStats::default();
        }
        let start = store.height() + 1 - window as u32;
        let mut stats = RecentBlockStats::default();
        for block in store.blocks_from(start) {
            stats.block_sizes.push(block.serialized_size());
            for tx in block.transactions.iter().skip(1) {
                if let Some(fee) = Self::confirmed_fee(store, tx) {
                    let size = tx.serialized_size().max(1) as u64;
                    stats.accepted_fee_rates.push(fee / size);
                }
            }
        }
        stats
    }

    /// Fee of a confirmed transaction, resolved through the tx index
    /// (inputs are spent, so the UTXO set cannot answer).
    fn confirmed_fee(store: &ChainStore, tx: &Transaction) -> Option<u64> {
        let mut input_value: u64 = 0;
        for input in &tx.inputs {
            let (prev_tx, _) = store.transaction(&input.prev.txid)?;
            let output = prev_tx.outputs.get(input.prev.index as usize)?;
            input_value = input_value.checked_add(output.value)?;
        }
        let output_value = tx.total_output_value()?;
        input_value.checked_sub(output_value)
    }

    /// Cumulative work of the current chain.
    pub fn total_work(&self) -> U256 {
        self.store.read().total_work()
    }
}

/// A template plus its reward breakdown, handed to miners and the pool.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub block: Block,
    /// Coinbase value: subsidy plus fees.
    pub reward: u64,
    /// Fee portion of the reward.
    pub fees: u64,
}
