//! In-process gossip router.
//!
//! Fans announcements out to registered handlers over a tokio broadcast
//! channel, deduplicating by message key at the receiver edge just as a
//! remote peer would. Used by single-process node+pool deployments and
//! by the integration tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use sable_core::types::{Block, Hash256, Transaction};

use crate::protocol::{Announcer, GossipHandler, GossipMessage};

/// Buffered messages per subscriber before lagging drops the oldest.
const CHANNEL_CAPACITY: usize = 256;

/// Local fan-out announcer with per-process dedup.
pub struct LocalGossip {
    sender: broadcast::Sender<GossipMessage>,
    seen: Mutex<HashSet<Hash256>>,
}

impl LocalGossip {
    pub fn new() -> Arc<Self> {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self {
            sender,
            seen: Mutex::new(HashSet::new()),
        })
    }

    /// Spawn a task delivering every announcement to `handler`.
    pub fn attach(self: &Arc<Self>, handler: Arc<dyn GossipHandler>) {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            while let Ok(message) = receiver.recv().await {
                match message {
                    GossipMessage::Block { block } => {
                        handler.on_block(block).await;
                    }
                    GossipMessage::Transaction { tx } => {
                        handler.on_tx(tx).await;
                    }
                }
            }
        });
    }

    fn publish(&self, message: GossipMessage) {
        let key = message.dedup_key();
        if !self.seen.lock().insert(key) {
            debug!(%key, "suppressing duplicate announcement");
            return;
        }
        // No subscribers is fine: fire-and-forget.
        let _ = self.sender.send(message);
    }

    /// Number of distinct messages announced so far.
    pub fn announced(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl Announcer for LocalGossip {
    async fn announce_block(&self, block: Block) {
        self.publish(GossipMessage::Block { block });
    }

    async fn announce_tx(&self, tx: Transaction) {
        self.publish(GossipMessage::Transaction { tx });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_core::types::{BlockHeader, OutPoint, TxInput, TxOutput};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_tx(seed: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput::new(OutPoint {
                txid: Hash256([seed; 32]),
                index: 0,
            })],
            outputs: vec![TxOutput {
                value: 5,
                script_pubkey: vec![],
            }],
            locktime: 0,
        }
    }

    fn sample_block(seed: u8) -> Block {
        Block {
            height: 1,
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256([seed; 32]),
                merkle_root: Hash256::ZERO,
                timestamp: 0,
                bits: 0,
                nonce: 0,
            },
            transactions: vec![sample_tx(seed)],
        }
    }

    struct Counter {
        blocks: AtomicUsize,
        txs: AtomicUsize,
    }

    #[async_trait]
    impl GossipHandler for Counter {
        async fn on_block(&self, _block: Block) -> bool {
            self.blocks.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn on_tx(&self, _tx: Transaction) -> bool {
            self.txs.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn delivers_to_attached_handler() {
        let gossip = LocalGossip::new();
        let counter = Arc::new(Counter {
            blocks: AtomicUsize::new(0),
            txs: AtomicUsize::new(0),
        });
        gossip.attach(counter.clone());

        gossip.announce_block(sample_block(1)).await;
        gossip.announce_tx(sample_tx(2)).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.blocks.load(Ordering::SeqCst), 1);
        assert_eq!(counter.txs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_announcements_suppressed() {
        let gossip = LocalGossip::new();
        let counter = Arc::new(Counter {
            blocks: AtomicUsize::new(0),
            txs: AtomicUsize::new(0),
        });
        gossip.attach(counter.clone());

        let block = sample_block(7);
        gossip.announce_block(block.clone()).await;
        gossip.announce_block(block).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.blocks.load(Ordering::SeqCst), 1);
        assert_eq!(gossip.announced(), 1);
    }

    #[tokio::test]
    async fn announce_without_subscribers_is_fine() {
        let gossip = LocalGossip::new();
        gossip.announce_tx(sample_tx(9)).await;
        assert_eq!(gossip.announced(), 1);
    }
}
