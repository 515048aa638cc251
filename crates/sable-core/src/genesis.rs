//! The hardcoded genesis block.
//!
//! Height 0 is fixed for every node: a single coinbase paying the
//! initial subsidy to an unspendable all-zero pubkey hash. Genesis is
//! trusted, not validated; the regular rules start at height 1.

use std::sync::LazyLock;

use crate::constants::{INITIAL_BITS, INITIAL_REWARD};
use crate::merkle;
use crate::script;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};
use crate::validation::coinbase_script_sig;

/// Genesis timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u32 = 1_767_225_600;

/// Message embedded in the genesis coinbase tag.
pub const GENESIS_MESSAGE: &[u8] = b"Dig where the ore runs deepest. Sable genesis 2026.";

struct GenesisData {
    block: Block,
    hash: Hash256,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build);

fn build() -> GenesisData {
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxInput {
            prev: OutPoint::null(),
            script_sig: coinbase_script_sig(0, GENESIS_MESSAGE),
            sequence: 0xFFFF_FFFF,
            prev_output: None,
        }],
        outputs: vec![TxOutput {
            value: INITIAL_REWARD,
            // All-zero pubkey hash: no known preimage, unspendable.
            script_pubkey: script::p2pkh_script(&[0u8; 20]),
        }],
        locktime: 0,
    };
    let merkle_root = merkle::merkle_root(&[coinbase.txid()]);
    let block = Block {
        height: 0,
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root,
            timestamp: GENESIS_TIMESTAMP,
            bits: INITIAL_BITS,
            nonce: 0,
        },
        transactions: vec![coinbase],
    };
    let hash = block.hash();
    GenesisData { block, hash }
}

/// The genesis block.
pub fn genesis_block() -> Block {
    GENESIS.block.clone()
}

/// The genesis block hash.
pub fn genesis_hash() -> Hash256 {
    GENESIS.hash
}

/// Whether a block is byte-identical to the hardcoded genesis.
pub fn is_genesis(block: &Block) -> bool {
    block.height == 0 && block.hash() == GENESIS.hash
}
