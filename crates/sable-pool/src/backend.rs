//! The pool's view of the node.
//!
//! The pool core depends only on the consensus semantics behind these
//! calls: templates built from the mempool, block submission, the
//! pool's own spendable outputs, transaction submission for payouts,
//! and fee estimates. A full node implements this directly; a remote
//! deployment would back it with the gossip surface.

use sable_consensus::engine::BlockTemplate;
use sable_core::fees::{FeeEstimate, Priority};
use sable_core::types::{Block, Hash256, OutPoint, Transaction, UtxoEntry};

pub trait PoolBackend: Send + Sync {
    /// Current chain tip `(height, hash)`.
    fn chain_tip(&self) -> (u32, Hash256);

    /// A mining template whose coinbase pays `payout_script`.
    fn template(&self, payout_script: Vec<u8>, tag: &[u8]) -> BlockTemplate;

    /// Submit an assembled block for validation and connection.
    fn submit_block(&self, block: Block) -> Result<(), String>;

    /// Mature UTXOs paying a script, spendable in the next block.
    fn spendable_utxos(&self, script_pubkey: &[u8]) -> Vec<(OutPoint, UtxoEntry)>;

    /// Submit a payout transaction to the mempool.
    fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, String>;

    /// Network fee estimate for one priority.
    fn fee_estimate(&self, priority: Priority) -> FeeEstimate;
}
