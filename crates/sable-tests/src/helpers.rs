//! Shared helpers for the end-to-end and adversarial tests.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use sable_consensus::engine::ConsensusEngine;
use sable_core::block_validation::check_pow;
use sable_core::chain::ChainStore;
use sable_core::constants::{EASIEST_BITS, INITIAL_REWARD};
use sable_core::crypto::{self, KeyPair};
use sable_core::mempool::Mempool;
use sable_core::merkle;
use sable_core::script;
use sable_core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput,
};
use sable_core::validation::coinbase_script_sig;

/// Fixed genesis timestamp for deterministic fixtures.
pub const T0: u32 = 1_800_000_000;

/// Build a coinbase paying `script_pubkey`.
pub fn coinbase(height: u32, value: u64, script_pubkey: Vec<u8>) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            prev: OutPoint::null(),
            script_sig: coinbase_script_sig(height, b"sable-tests"),
            sequence: 0xFFFF_FFFF,
            prev_output: None,
        }],
        outputs: vec![TxOutput { value, script_pubkey }],
        locktime: 0,
    }
}

/// Grind the nonce until the header beats its own target.
pub fn mine(header: &mut BlockHeader) {
    while check_pow(header).is_err() {
        header.nonce += 1;
    }
}

/// Assemble and mine a block with a correct merkle root.
pub fn build_block(
    height: u32,
    prev_hash: Hash256,
    timestamp: u32,
    bits: u32,
    txs: Vec<Transaction>,
) -> Block {
    let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid()).collect();
    let mut header = BlockHeader {
        version: 1,
        prev_hash,
        merkle_root: merkle::merkle_root(&txids),
        timestamp,
        bits,
        nonce: 0,
    };
    mine(&mut header);
    Block {
        height,
        header,
        transactions: txs,
    }
}

/// An engine over a fresh chain with a frozen clock, plus a funded key.
pub struct Fixture {
    pub engine: ConsensusEngine,
    pub key: KeyPair,
}

impl Fixture {
    pub fn new() -> Self {
        let key = KeyPair::generate();
        let genesis = build_block(
            0,
            Hash256::ZERO,
            T0,
            EASIEST_BITS,
            vec![coinbase(0, INITIAL_REWARD, script::p2pkh_script(&[0; 20]))],
        );
        let store = Arc::new(RwLock::new(ChainStore::new(genesis).unwrap()));
        let mempool = Arc::new(Mutex::new(Mempool::with_defaults()));
        let engine =
            ConsensusEngine::with_clock(store, mempool, || u64::from(T0) + 5_000_000);
        Self { engine, key }
    }

    pub fn miner_script(&self) -> Vec<u8> {
        script::p2pkh_script(&self.key.pubkey_hash())
    }

    pub fn tip(&self) -> (u32, Hash256, u32) {
        let store = self.engine.store().read();
        (
            store.height(),
            store.tip_hash(),
            store.tip().header.timestamp,
        )
    }

    /// Mine one block containing `extra` non-coinbase transactions whose
    /// fees flow into the coinbase.
    pub fn mine_block_with(&self, extra: Vec<Transaction>, fees: u64) -> Block {
        let (height, tip_hash, tip_time) = self.tip();
        let mut txs = vec![coinbase(
            height + 1,
            sable_core::reward::subsidy(height + 1) + fees,
            self.miner_script(),
        )];
        txs.extend(extra);
        let block = build_block(height + 1, tip_hash, tip_time + 120, EASIEST_BITS, txs);
        self.engine.add_block(block.clone()).unwrap();
        block
    }

    /// Mine `n` empty blocks.
    pub fn mine_chain(&self, n: u32) {
        for _ in 0..n {
            self.mine_block_with(Vec::new(), 0);
        }
    }

    /// A signed transaction spending `prev` (paying our own key) to a
    /// throwaway script.
    pub fn signed_spend(&self, prev: OutPoint, prev_value: u64, out_value: u64) -> Transaction {
        let mut input = TxInput::new(prev);
        input.prev_output = Some(TxOutput {
            value: prev_value,
            script_pubkey: self.miner_script(),
        });
        let mut tx = Transaction {
            version: 1,
            inputs: vec![input],
            outputs: vec![TxOutput {
                value: out_value,
                script_pubkey: script::p2pkh_script(&[0xBB; 20]),
            }],
            locktime: 0,
        };
        crypto::sign_input(&mut tx, 0, &self.key).unwrap();
        tx
    }

    /// Outpoint of the coinbase output at `height`.
    pub fn coinbase_outpoint(&self, height: u32) -> OutPoint {
        let store = self.engine.store().read();
        OutPoint {
            txid: store.block_at(height).unwrap().transactions[0].txid(),
            index: 0,
        }
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
