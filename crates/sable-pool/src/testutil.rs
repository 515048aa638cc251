//! Shared test fixtures: a pool backend over a real in-process node
//! (chain store + mempool + consensus engine) with a controllable clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use sable_consensus::engine::{BlockTemplate, ConsensusEngine};
use sable_core::block_validation::check_pow;
use sable_core::chain::ChainStore;
use sable_core::constants::{EASIEST_BITS, INITIAL_REWARD};
use sable_core::fees::{FeeEstimate, Priority};
use sable_core::mempool::Mempool;
use sable_core::merkle;
use sable_core::script;
use sable_core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput, UtxoEntry,
};
use sable_core::validation::coinbase_script_sig;

use crate::backend::PoolBackend;

/// Mid-difficulty test bits: share space (×256) fits without saturating
/// and a block grind stays around 2^16 hashes.
pub const TEST_BITS: u32 = 0x1F00_FFFF;

const T0: u32 = 1_800_000_000;

pub struct TestBackend {
    engine: ConsensusEngine,
    clock: Arc<AtomicU64>,
}

impl TestBackend {
    /// Backend whose templates advertise [`TEST_BITS`].
    pub fn new() -> Arc<Self> {
        Self::with_bits(TEST_BITS)
    }

    /// Backend at the easiest target, for tests that mine long chains.
    pub fn easy() -> Arc<Self> {
        Self::with_bits(EASIEST_BITS)
    }

    fn with_bits(bits: u32) -> Arc<Self> {
        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::null(),
                script_sig: coinbase_script_sig(0, b"test-genesis"),
                sequence: 0xFFFF_FFFF,
                prev_output: None,
            }],
            outputs: vec![TxOutput {
                value: INITIAL_REWARD,
                script_pubkey: script::p2pkh_script(&[0u8; 20]),
            }],
            locktime: 0,
        };
        let genesis = Block {
            height: 0,
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256::ZERO,
                merkle_root: merkle::merkle_root(&[coinbase.txid()]),
                timestamp: T0,
                bits,
                nonce: 0,
            },
            transactions: vec![coinbase],
        };

        let store = Arc::new(RwLock::new(ChainStore::new(genesis).unwrap()));
        let mempool = Arc::new(Mutex::new(Mempool::with_defaults()));
        // Stay inside the emergency threshold so templates keep the
        // genesis bits instead of easing toward the cap.
        let clock = Arc::new(AtomicU64::new(u64::from(T0) + 100));
        let clock_handle = clock.clone();
        let engine = ConsensusEngine::with_clock(store, mempool, move || {
            clock_handle.load(Ordering::SeqCst)
        });
        Arc::new(Self { engine, clock })
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.engine
    }

    /// Mine one block paying a throwaway script.
    pub fn advance_tip(&self) {
        self.mine_to(&script::p2pkh_script(&[0xEE; 20]), 1);
    }

    /// Mine `n` template blocks paying `script_pubkey`.
    pub fn mine_to(&self, script_pubkey: &[u8], n: u32) {
        for _ in 0..n {
            self.clock.fetch_add(120, Ordering::SeqCst);
            let template = self
                .engine
                .block_template(script_pubkey.to_vec(), b"testutil");
            let mut block = template.block;
            while check_pow(&block.header).is_err() {
                block.header.nonce += 1;
            }
            self.engine.add_block(block).expect("test block connects");
        }
    }
}

impl PoolBackend for TestBackend {
    fn chain_tip(&self) -> (u32, Hash256) {
        let store = self.engine.store().read();
        (store.height(), store.tip_hash())
    }

    fn template(&self, payout_script: Vec<u8>, tag: &[u8]) -> BlockTemplate {
        self.engine.block_template(payout_script, tag)
    }

    fn submit_block(&self, block: Block) -> Result<(), String> {
        self.engine
            .add_block(block)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn spendable_utxos(&self, script_pubkey: &[u8]) -> Vec<(OutPoint, UtxoEntry)> {
        self.engine.store().read().spendable_utxos(script_pubkey)
    }

    fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, String> {
        self.engine
            .submit_transaction(tx)
            .map_err(|e| e.to_string())
    }

    fn fee_estimate(&self, priority: Priority) -> FeeEstimate {
        self.engine.fee_estimate(priority)
    }
}
