//! Trait seams between crates.

use crate::error::SableError;
use crate::types::{Block, Hash256, OutPoint, UtxoEntry};

/// Read-only view of chain state.
///
/// The chain store alone mutates; the pool, wallet, and gossip layers
/// hold a view and request mutations through the consensus engine's
/// narrow entry points.
pub trait ChainView: Send + Sync {
    /// Look up a UTXO. `None` if spent or unknown.
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, SableError>;

    /// Current tip as `(height, hash)`.
    fn tip(&self) -> Result<(u32, Hash256), SableError>;

    /// Compact target expected of the next block (before emergency
    /// template easing).
    fn current_bits(&self) -> Result<u32, SableError>;

    /// Block at a height, if within the chain.
    fn block_at(&self, height: u32) -> Result<Option<Block>, SableError>;

    /// Block by hash.
    fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, SableError>;

    /// Mature UTXOs paying a locking script, spendable in the next block.
    fn spendable_utxos(
        &self,
        script_pubkey: &[u8],
    ) -> Result<Vec<(OutPoint, UtxoEntry)>, SableError>;
}
