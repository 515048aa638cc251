//! Gossip message shapes and the handler/announcer trait pair.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sable_core::types::{Block, Hash256, Transaction};

/// A gossip payload exchanged between nodes.
///
/// JSON-shaped; receivers ignore unknown fields, so additive evolution
/// is safe. Delivery must be idempotent by block hash / txid.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipMessage {
    Block { block: Block },
    Transaction { tx: Transaction },
}

impl GossipMessage {
    /// The dedup key receivers are expected to apply.
    pub fn dedup_key(&self) -> Hash256 {
        match self {
            GossipMessage::Block { block } => block.hash(),
            GossipMessage::Transaction { tx } => tx.txid(),
        }
    }
}

/// Inbound side: a node's ingestion surface.
///
/// Implementations must make each delivery durable or reject it;
/// duplicate deliveries of the same block hash or txid must be no-ops.
#[async_trait]
pub trait GossipHandler: Send + Sync {
    /// A block arrived from a peer. Returns whether it was accepted
    /// (false covers both rejection and already-known).
    async fn on_block(&self, block: Block) -> bool;

    /// A transaction arrived from a peer.
    async fn on_tx(&self, tx: Transaction) -> bool;
}

/// Outbound side: fire-and-forget announcements with no delivery
/// guarantee.
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce_block(&self, block: Block);
    async fn announce_tx(&self, tx: Transaction);
}
