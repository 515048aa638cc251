//! Chain store: ordered blocks, lookup indexes, the UTXO set, and
//! cumulative work.
//!
//! The store holds the canonical chain as a height-ordered vector
//! (genesis at 0) plus three derived structures kept in lockstep: a
//! block-hash → height index, a txid → (block hash, position) index, and
//! the UTXO set with per-block undo data for disconnection during
//! reorganization.
//!
//! Blocks passed to [`ChainStore::connect_block`] must already be
//! validated; the store performs only linkage sanity checks. All
//! mutation goes through `connect_block`/`disconnect_tip` — the
//! consensus engine (sable-consensus) is the only caller of either.
//! Not thread-safe; callers wrap the store in a lock.

use std::collections::HashMap;

use primitive_types::U256;

use crate::block_validation::{median_time_past, ValidationContext};
use crate::compact::{block_work, target_from_bits};
use crate::constants::DGW_WINDOW;
use crate::difficulty::{next_bits, DifficultyParams};
use crate::error::ChainError;
use crate::types::{Block, Hash256, OutPoint, Transaction, UtxoEntry};

/// Undo data for reverting a connected block: the UTXOs its transactions
/// consumed, in consumption order.
#[derive(Clone, Debug)]
struct BlockUndo {
    spent_utxos: Vec<(OutPoint, UtxoEntry)>,
    work: U256,
}

/// The canonical chain and all state derived from it.
pub struct ChainStore {
    /// Blocks ordered by height. Never empty: index 0 is genesis.
    blocks: Vec<Block>,
    /// Block hash → height.
    block_index: HashMap<Hash256, u32>,
    /// Txid → (containing block hash, position within the block).
    tx_index: HashMap<Hash256, (Hash256, u32)>,
    /// Unspent transaction outputs.
    utxos: HashMap<OutPoint, UtxoEntry>,
    /// Undo data per connected block hash.
    undo: HashMap<Hash256, BlockUndo>,
    /// Σ over blocks of 2²⁵⁶ / (target + 1).
    total_work: U256,
    /// Retarget state after each block: `bits_state[h]` is the compact
    /// target expected of block `h + 1`.
    bits_state: Vec<u32>,
    params: DifficultyParams,
}

impl ChainStore {
    /// Create a store seeded with a trusted genesis block.
    pub fn new(genesis: Block) -> Result<Self, ChainError> {
        Self::with_params(genesis, DifficultyParams::default())
    }

    pub fn with_params(genesis: Block, params: DifficultyParams) -> Result<Self, ChainError> {
        if genesis.height != 0 {
            return Err(ChainError::HeightMismatch {
                expected: 0,
                got: genesis.height,
            });
        }
        let mut store = Self {
            blocks: Vec::new(),
            block_index: HashMap::new(),
            tx_index: HashMap::new(),
            utxos: HashMap::new(),
            undo: HashMap::new(),
            total_work: U256::zero(),
            bits_state: Vec::new(),
            params,
        };
        store.commit(genesis)?;
        Ok(store)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn tip(&self) -> &Block {
        self.blocks.last().expect("chain is never empty")
    }

    pub fn height(&self) -> u32 {
        self.tip().height
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.tip().hash()
    }

    pub fn block_at(&self, height: u32) -> Option<&Block> {
        self.blocks.get(height as usize)
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Option<&Block> {
        self.block_index
            .get(hash)
            .and_then(|&h| self.blocks.get(h as usize))
    }

    pub fn height_of(&self, hash: &Hash256) -> Option<u32> {
        self.block_index.get(hash).copied()
    }

    /// Find a confirmed transaction and the block containing it.
    pub fn transaction(&self, txid: &Hash256) -> Option<(&Transaction, &Block)> {
        let (block_hash, index) = self.tx_index.get(txid)?;
        let block = self.block_by_hash(block_hash)?;
        let tx = block.transactions.get(*index as usize)?;
        Some((tx, block))
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        self.utxos.get(outpoint).cloned()
    }

    pub fn utxo_count(&self) -> usize {
        self.utxos.len()
    }

    /// Iterate the full UTXO set (balance audits, supply checks).
    pub fn iter_utxos(&self) -> impl Iterator<Item = (&OutPoint, &UtxoEntry)> {
        self.utxos.iter()
    }

    /// All UTXOs paying the given locking script.
    pub fn utxos_for_script(&self, script_pubkey: &[u8]) -> Vec<(OutPoint, UtxoEntry)> {
        let mut found: Vec<(OutPoint, UtxoEntry)> = self
            .utxos
            .iter()
            .filter(|(_, entry)| entry.output.script_pubkey == script_pubkey)
            .map(|(op, entry)| (*op, entry.clone()))
            .collect();
        found.sort_by_key(|(op, _)| *op);
        found
    }

    /// UTXOs paying `script_pubkey` that are mature for inclusion in the
    /// next block.
    pub fn spendable_utxos(&self, script_pubkey: &[u8]) -> Vec<(OutPoint, UtxoEntry)> {
        let next_height = self.height() + 1;
        self.utxos_for_script(script_pubkey)
            .into_iter()
            .filter(|(_, entry)| entry.is_mature(next_height))
            .collect()
    }

    /// Confirmed balance of a locking script (mature and immature).
    pub fn balance(&self, script_pubkey: &[u8]) -> u64 {
        self.utxos_for_script(script_pubkey)
            .iter()
            .map(|(_, entry)| entry.output.value)
            .sum()
    }

    pub fn total_work(&self) -> U256 {
        self.total_work
    }

    /// Compact target expected of the next block (retarget state; the
    /// emergency easing for templates is layered on by the engine).
    pub fn current_bits(&self) -> u32 {
        *self.bits_state.last().expect("chain is never empty")
    }

    pub fn params(&self) -> &DifficultyParams {
        &self.params
    }

    /// Timestamps of the trailing `count` blocks, oldest→newest.
    pub fn trailing_timestamps(&self, count: usize) -> Vec<u32> {
        let start = self.blocks.len().saturating_sub(count);
        self.blocks[start..]
            .iter()
            .map(|b| b.header.timestamp)
            .collect()
    }

    /// The context a candidate next block is validated against.
    pub fn validation_context(&self, now: u64) -> ValidationContext {
        ValidationContext {
            expected_height: self.height() + 1,
            prev_hash: self.tip_hash(),
            mtp: median_time_past(&self.trailing_timestamps(crate::constants::MTP_WINDOW)),
            now,
        }
    }

    /// Iterate blocks from `start` height to the tip.
    pub fn blocks_from(&self, start: u32) -> &[Block] {
        &self.blocks[(start as usize).min(self.blocks.len())..]
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Append a validated block to the chain, updating every index, the
    /// UTXO set, cumulative work, and the retarget state.
    pub fn connect_block(&mut self, block: Block) -> Result<(), ChainError> {
        if block.height != self.height() + 1 {
            return Err(ChainError::HeightMismatch {
                expected: self.height() + 1,
                got: block.height,
            });
        }
        if block.header.prev_hash != self.tip_hash() {
            return Err(ChainError::BadFork(format!(
                "parent {} is not the tip",
                block.header.prev_hash
            )));
        }
        self.commit(block)
    }

    fn commit(&mut self, block: Block) -> Result<(), ChainError> {
        let block_hash = block.hash();
        if self.block_index.contains_key(&block_hash) {
            return Err(ChainError::DuplicateBlock(block_hash.to_string()));
        }

        let work = target_from_bits(block.header.bits)
            .map(block_work)
            .unwrap_or_default();
        let mut undo = BlockUndo {
            spent_utxos: Vec::new(),
            work,
        };

        // Spend inputs, then create outputs, in transaction order.
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let entry = self.utxos.remove(&input.prev).ok_or_else(|| {
                        ChainError::MissingUtxo(input.prev.to_string())
                    })?;
                    undo.spent_utxos.push((input.prev, entry));
                }
            }
            let txid = tx.txid();
            let is_coinbase = tx.is_coinbase();
            for (index, output) in tx.outputs.iter().enumerate() {
                self.utxos.insert(
                    OutPoint { txid, index: index as u32 },
                    UtxoEntry {
                        output: output.clone(),
                        height: block.height,
                        is_coinbase,
                    },
                );
            }
        }

        for (index, tx) in block.transactions.iter().enumerate() {
            self.tx_index.insert(tx.txid(), (block_hash, index as u32));
        }
        self.block_index.insert(block_hash, block.height);
        self.undo.insert(block_hash, undo);
        self.total_work = self.total_work.saturating_add(work);
        self.blocks.push(block);
        self.bits_state.push(self.retarget());
        Ok(())
    }

    /// Retarget state after the current tip.
    fn retarget(&self) -> u32 {
        let current = self
            .bits_state
            .last()
            .copied()
            .unwrap_or(self.tip().header.bits);
        let window = self.trailing_timestamps(DGW_WINDOW as usize + 1);
        next_bits(&self.params, current, &window, self.height())
    }

    /// Remove the tip block, restoring the UTXOs it spent and deleting
    /// the ones it created. Returns the disconnected block. The genesis
    /// block cannot be disconnected.
    pub fn disconnect_tip(&mut self) -> Result<Block, ChainError> {
        if self.blocks.len() == 1 {
            return Err(ChainError::EmptyChain);
        }
        let block = self.blocks.pop().expect("length checked");
        let block_hash = block.hash();

        let undo = self
            .undo
            .remove(&block_hash)
            .ok_or_else(|| ChainError::UndoDataMissing(block_hash.to_string()))?;

        // Remove created UTXOs (reverse order), restore spent ones.
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid();
            for index in 0..tx.outputs.len() {
                self.utxos.remove(&OutPoint { txid, index: index as u32 });
            }
            self.tx_index.remove(&txid);
        }
        for (outpoint, entry) in undo.spent_utxos {
            self.utxos.insert(outpoint, entry);
        }

        self.block_index.remove(&block_hash);
        self.total_work = self.total_work.saturating_sub(undo.work);
        self.bits_state.pop();
        Ok(block)
    }

    /// Recompute cumulative work by summing every block's target. Called
    /// after a reorganization to keep the total exact.
    pub fn recompute_total_work(&mut self) {
        self.total_work = self
            .blocks
            .iter()
            .map(|b| {
                target_from_bits(b.header.bits)
                    .map(block_work)
                    .unwrap_or_default()
            })
            .fold(U256::zero(), |acc, w| acc.saturating_add(w));
    }

    /// Work of a contiguous block sequence, for fork comparison.
    pub fn sequence_work(blocks: &[Block]) -> U256 {
        blocks
            .iter()
            .map(|b| {
                target_from_bits(b.header.bits)
                    .map(block_work)
                    .unwrap_or_default()
            })
            .fold(U256::zero(), |acc, w| acc.saturating_add(w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_validation::check_pow;
    use crate::constants::{COIN, EASIEST_BITS, INITIAL_REWARD};
    use crate::merkle;
    use crate::script;
    use crate::types::{BlockHeader, TxInput, TxOutput};
    use crate::validation::coinbase_script_sig;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn pkh(seed: u8) -> [u8; 20] {
        [seed; 20]
    }

    fn coinbase(height: u32, value: u64, seed: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::null(),
                script_sig: coinbase_script_sig(height, &[seed]),
                sequence: 0xFFFF_FFFF,
                prev_output: None,
            }],
            outputs: vec![TxOutput {
                value,
                script_pubkey: script::p2pkh_script(&pkh(seed)),
            }],
            locktime: 0,
        }
    }

    fn spend(outpoints: &[OutPoint], value: u64, seed: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: outpoints.iter().map(|op| TxInput::new(*op)).collect(),
            outputs: vec![TxOutput {
                value,
                script_pubkey: script::p2pkh_script(&pkh(seed)),
            }],
            locktime: 0,
        }
    }

    fn build_block(height: u32, prev_hash: Hash256, timestamp: u32, txs: Vec<Transaction>) -> Block {
        let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid()).collect();
        let mut header = BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: merkle::merkle_root(&txids),
            timestamp,
            bits: EASIEST_BITS,
            nonce: 0,
        };
        while check_pow(&header).is_err() {
            header.nonce += 1;
        }
        Block { height, header, transactions: txs }
    }

    fn genesis() -> Block {
        build_block(0, Hash256::ZERO, 1_000_000, vec![coinbase(0, INITIAL_REWARD, 0xA0)])
    }

    fn store() -> ChainStore {
        ChainStore::new(genesis()).unwrap()
    }

    /// Extend the store with a coinbase-only block and return its hash.
    fn extend(store: &mut ChainStore, seed: u8) -> Hash256 {
        let height = store.height() + 1;
        let block = build_block(
            height,
            store.tip_hash(),
            store.tip().header.timestamp + 120,
            vec![coinbase(height, INITIAL_REWARD, seed)],
        );
        let hash = block.hash();
        store.connect_block(block).unwrap();
        hash
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    #[test]
    fn new_store_holds_genesis() {
        let s = store();
        assert_eq!(s.height(), 0);
        assert_eq!(s.utxo_count(), 1);
        assert!(s.total_work() > U256::zero());
    }

    #[test]
    fn genesis_must_be_height_zero() {
        let mut g = genesis();
        g.height = 1;
        assert!(matches!(
            ChainStore::new(g),
            Err(ChainError::HeightMismatch { expected: 0, got: 1 })
        ));
    }

    // ------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------

    #[test]
    fn connect_advances_tip_and_indexes() {
        let mut s = store();
        let hash1 = extend(&mut s, 1);

        assert_eq!(s.height(), 1);
        assert_eq!(s.tip_hash(), hash1);
        assert_eq!(s.height_of(&hash1), Some(1));
        assert_eq!(s.utxo_count(), 2);

        let cb_txid = s.tip().transactions[0].txid();
        let (tx, block) = s.transaction(&cb_txid).unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(block.height, 1);
    }

    #[test]
    fn connect_rejects_wrong_height() {
        let mut s = store();
        let block = build_block(
            5,
            s.tip_hash(),
            s.tip().header.timestamp + 120,
            vec![coinbase(5, INITIAL_REWARD, 1)],
        );
        assert!(matches!(
            s.connect_block(block),
            Err(ChainError::HeightMismatch { expected: 1, got: 5 })
        ));
    }

    #[test]
    fn connect_rejects_wrong_parent() {
        let mut s = store();
        let block = build_block(
            1,
            Hash256([0xEE; 32]),
            s.tip().header.timestamp + 120,
            vec![coinbase(1, INITIAL_REWARD, 1)],
        );
        assert!(matches!(s.connect_block(block), Err(ChainError::BadFork(_))));
    }

    #[test]
    fn connect_rejects_duplicate_block() {
        let mut s = store();
        let block = build_block(
            1,
            s.tip_hash(),
            s.tip().header.timestamp + 120,
            vec![coinbase(1, INITIAL_REWARD, 1)],
        );
        s.connect_block(block.clone()).unwrap();
        let mut dup = block;
        dup.height = 2;
        // Same header bytes → same hash → duplicate, whatever the height.
        assert!(matches!(
            s.connect_block(dup),
            Err(ChainError::DuplicateBlock(_)) | Err(ChainError::BadFork(_))
        ));
    }

    #[test]
    fn connect_spends_and_creates_utxos() {
        let mut s = store();
        extend(&mut s, 1);
        let cb1_txid = s.tip().transactions[0].txid();
        let op = OutPoint { txid: cb1_txid, index: 0 };

        let height = s.height() + 1;
        let block = build_block(
            height,
            s.tip_hash(),
            s.tip().header.timestamp + 120,
            vec![
                coinbase(height, INITIAL_REWARD, 2),
                spend(&[op], INITIAL_REWARD - COIN, 0x55),
            ],
        );
        s.connect_block(block).unwrap();

        assert_eq!(s.get_utxo(&op), None);
        assert_eq!(s.utxo_count(), 3); // genesis cb + cb2 + spend output
        assert_eq!(s.balance(&script::p2pkh_script(&pkh(0x55))), INITIAL_REWARD - COIN);
    }

    #[test]
    fn connect_missing_utxo_fails() {
        let mut s = store();
        let height = s.height() + 1;
        let ghost = OutPoint { txid: Hash256([0xAB; 32]), index: 0 };
        let block = build_block(
            height,
            s.tip_hash(),
            s.tip().header.timestamp + 120,
            vec![coinbase(height, INITIAL_REWARD, 1), spend(&[ghost], 1, 2)],
        );
        assert!(matches!(
            s.connect_block(block),
            Err(ChainError::MissingUtxo(_))
        ));
    }

    #[test]
    fn work_accumulates_monotonically() {
        let mut s = store();
        let mut last = s.total_work();
        for seed in 1..5u8 {
            extend(&mut s, seed);
            assert!(s.total_work() > last);
            last = s.total_work();
        }
    }

    // ------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------

    #[test]
    fn disconnect_restores_spent_utxos() {
        let mut s = store();
        extend(&mut s, 1);
        let cb1_txid = s.tip().transactions[0].txid();
        let op = OutPoint { txid: cb1_txid, index: 0 };

        let height = s.height() + 1;
        let block = build_block(
            height,
            s.tip_hash(),
            s.tip().header.timestamp + 120,
            vec![
                coinbase(height, INITIAL_REWARD, 2),
                spend(&[op], INITIAL_REWARD - COIN, 0x55),
            ],
        );
        let spend_txid = block.transactions[1].txid();
        s.connect_block(block).unwrap();

        let disconnected = s.disconnect_tip().unwrap();
        assert_eq!(disconnected.height, 2);

        // The spent coinbase output is back, and still flagged coinbase.
        let restored = s.get_utxo(&op).unwrap();
        assert!(restored.is_coinbase);
        assert_eq!(restored.height, 1);
        // The spend's output is gone, and so is its tx index entry.
        assert_eq!(s.get_utxo(&OutPoint { txid: spend_txid, index: 0 }), None);
        assert!(s.transaction(&spend_txid).is_none());
        assert_eq!(s.height(), 1);
    }

    #[test]
    fn disconnect_genesis_refused() {
        let mut s = store();
        assert!(matches!(s.disconnect_tip(), Err(ChainError::EmptyChain)));
    }

    #[test]
    fn connect_disconnect_roundtrip_is_identity() {
        let mut s = store();
        extend(&mut s, 1);
        extend(&mut s, 2);

        let utxos_before = s.utxo_count();
        let work_before = s.total_work();
        let tip_before = s.tip_hash();
        let bits_before = s.current_bits();

        let height = s.height() + 1;
        let block = build_block(
            height,
            s.tip_hash(),
            s.tip().header.timestamp + 120,
            vec![coinbase(height, INITIAL_REWARD, 3)],
        );
        s.connect_block(block).unwrap();
        s.disconnect_tip().unwrap();

        assert_eq!(s.utxo_count(), utxos_before);
        assert_eq!(s.total_work(), work_before);
        assert_eq!(s.tip_hash(), tip_before);
        assert_eq!(s.current_bits(), bits_before);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[test]
    fn validation_context_tracks_tip() {
        let mut s = store();
        extend(&mut s, 1);
        let ctx = s.validation_context(9_999_999_999);
        assert_eq!(ctx.expected_height, 2);
        assert_eq!(ctx.prev_hash, s.tip_hash());
        // Short chain: MTP falls back to the tip timestamp.
        assert_eq!(ctx.mtp, s.tip().header.timestamp);
    }

    #[test]
    fn trailing_timestamps_window() {
        let mut s = store();
        for seed in 1..=5u8 {
            extend(&mut s, seed);
        }
        let ts = s.trailing_timestamps(3);
        assert_eq!(ts.len(), 3);
        assert!(ts[0] < ts[1] && ts[1] < ts[2]);
        // Larger than chain: everything.
        assert_eq!(s.trailing_timestamps(100).len(), 6);
    }

    #[test]
    fn spendable_excludes_immature_coinbase() {
        let mut s = store();
        extend(&mut s, 1);
        let script = script::p2pkh_script(&pkh(1));
        // Height 1 coinbase at tip height 1: 2 confirmations at next
        // height — far from 100.
        assert_eq!(s.balance(&script), INITIAL_REWARD);
        assert!(s.spendable_utxos(&script).is_empty());
    }

    #[test]
    fn sequence_work_matches_connected_work() {
        let mut s = store();
        let base_work = s.total_work();
        extend(&mut s, 1);
        extend(&mut s, 2);
        let suffix: Vec<Block> = s.blocks_from(1).to_vec();
        assert_eq!(
            ChainStore::sequence_work(&suffix),
            s.total_work() - base_work
        );
    }

    #[test]
    fn recompute_total_work_is_stable() {
        let mut s = store();
        for seed in 1..4u8 {
            extend(&mut s, seed);
        }
        let before = s.total_work();
        s.recompute_total_work();
        assert_eq!(s.total_work(), before);
    }
}
