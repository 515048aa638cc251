//! Full node composition.
//!
//! [`Node`] wires the chain store, mempool, and consensus engine
//! together behind narrow entry points (`submit_block`,
//! `submit_transaction`, `try_reorganize`), persists chain and mempool
//! files, feeds the mining pool through [`PoolBackend`], and ingests
//! gossip through [`GossipHandler`]. The store mutates only inside the
//! engine; everything else reads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use sable_consensus::engine::{AcceptedBlock, BlockTemplate, ConsensusEngine};
use sable_core::chain::ChainStore;
use sable_core::error::{MempoolError, SableError};
use sable_core::fees::{FeeEstimate, Priority};
use sable_core::genesis;
use sable_core::mempool::Mempool;
use sable_core::traits::ChainView;
use sable_core::types::{Block, Hash256, OutPoint, Transaction, UtxoEntry};
use sable_network::{Announcer, GossipHandler};
use sable_pool::PoolBackend;

use crate::config::NodeConfig;
use crate::storage;

/// A running node: storage, mempool, consensus, and gossip surfaces.
pub struct Node {
    config: NodeConfig,
    store: Arc<RwLock<ChainStore>>,
    mempool: Arc<Mutex<Mempool>>,
    engine: ConsensusEngine,
    announcer: Mutex<Option<Arc<dyn Announcer>>>,
    shutdown: watch::Sender<bool>,
}

impl Node {
    /// Open (or create) a node in `config.data_dir`.
    ///
    /// Replays the chain file through a fresh store (blocks validated
    /// once are trusted on reload), then re-admits persisted mempool
    /// entries against the restored UTXO set.
    pub fn open(config: NodeConfig) -> Result<Arc<Self>, SableError> {
        let blocks = storage::load_chain(&config.chain_path())?;
        let store = match blocks {
            Some(mut blocks) if !blocks.is_empty() => {
                let mut store = ChainStore::new(blocks.remove(0))?;
                for block in blocks {
                    store.connect_block(block)?;
                }
                info!(height = store.height(), "chain restored from disk");
                store
            }
            _ => {
                info!("starting fresh chain from genesis");
                ChainStore::new(genesis::genesis_block())?
            }
        };

        let mut mempool = Mempool::new(config.mempool_max_bytes, config.mempool_ttl_secs);
        if let Some((_, entries)) = storage::load_mempool(&config.mempool_path())? {
            let spend_height = store.height() + 1;
            let mut restored = 0usize;
            for (tx, admitted_at) in entries {
                match mempool.add(tx, |op| store.get_utxo(op), spend_height, admitted_at, true) {
                    Ok(_) => restored += 1,
                    Err(e) => debug!(error = %e, "persisted mempool entry dropped"),
                }
            }
            info!(restored, "mempool restored from disk");
        }

        let store = Arc::new(RwLock::new(store));
        let mempool = Arc::new(Mutex::new(mempool));
        let engine = ConsensusEngine::new(store.clone(), mempool.clone());
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            config,
            store,
            mempool,
            engine,
            announcer: Mutex::new(None),
            shutdown,
        }))
    }

    /// Attach the outbound gossip side.
    pub fn set_announcer(&self, announcer: Arc<dyn Announcer>) {
        *self.announcer.lock() = Some(announcer);
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.engine
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Validate and connect a block, then announce it.
    pub fn submit_block(&self, block: Block) -> Result<AcceptedBlock, SableError> {
        let accepted = self.engine.add_block(block.clone())?;
        self.announce_block(block);
        Ok(accepted)
    }

    /// Admit a transaction to the mempool, then announce it.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, MempoolError> {
        let txid = self.engine.submit_transaction(tx.clone())?;
        self.announce_tx(tx);
        Ok(txid)
    }

    /// Offer a competing chain suffix; adopted only on strictly more
    /// work within the rollback limit.
    pub fn try_reorganize(&self, candidate: Vec<Block>) -> Result<(), SableError> {
        self.engine.try_reorganize(candidate)
    }

    pub fn fee_estimates(&self) -> [FeeEstimate; 3] {
        self.engine.fee_estimates()
    }

    pub fn balance(&self, script_pubkey: &[u8]) -> u64 {
        self.store.read().balance(script_pubkey)
    }

    fn announce_block(&self, block: Block) {
        if let Some(announcer) = self.announcer.lock().clone() {
            tokio::spawn(async move {
                announcer.announce_block(block).await;
            });
        }
    }

    fn announce_tx(&self, tx: Transaction) {
        if let Some(announcer) = self.announcer.lock().clone() {
            tokio::spawn(async move {
                announcer.announce_tx(tx).await;
            });
        }
    }

    /// Write the chain and mempool files. Failures propagate; in-memory
    /// state is already consistent and unaffected.
    pub fn persist(&self) -> Result<(), SableError> {
        storage::save_chain(&self.config.chain_path(), &self.store.read())?;
        storage::save_mempool(&self.config.mempool_path(), &self.mempool.lock())?;
        Ok(())
    }

    /// Periodic upkeep: mempool TTL pruning and persistence. Returns
    /// when [`Node::shutdown`] fires.
    pub async fn run_maintenance(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let interval = Duration::from_secs(self.config.persist_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }

            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let expired = self.mempool.lock().prune_expired(now);
            if !expired.is_empty() {
                debug!(count = expired.len(), "pruned expired mempool entries");
            }
            if let Err(e) = self.persist() {
                warn!(error = %e, "periodic persistence failed");
            }
        }
    }

    /// Stop background tasks and write final state.
    pub fn shutdown(&self) -> Result<(), SableError> {
        let _ = self.shutdown.send(true);
        self.persist()
    }
}

#[async_trait]
impl GossipHandler for Node {
    async fn on_block(&self, block: Block) -> bool {
        let hash = block.hash();
        if self.store.read().height_of(&hash).is_some() {
            return false; // idempotent: already connected
        }
        match self.engine.add_block(block) {
            Ok(accepted) => {
                info!(height = accepted.height, %hash, "gossip block connected");
                true
            }
            Err(e) => {
                debug!(%hash, error = %e, "gossip block rejected");
                false
            }
        }
    }

    async fn on_tx(&self, tx: Transaction) -> bool {
        match self.engine.submit_transaction(tx) {
            Ok(_) => true,
            Err(MempoolError::Duplicate(_)) => false,
            Err(e) => {
                debug!(error = %e, "gossip tx rejected");
                false
            }
        }
    }
}

impl ChainView for Node {
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, SableError> {
        Ok(self.store.read().get_utxo(outpoint))
    }

    fn tip(&self) -> Result<(u32, Hash256), SableError> {
        let store = self.store.read();
        Ok((store.height(), store.tip_hash()))
    }

    fn current_bits(&self) -> Result<u32, SableError> {
        Ok(self.store.read().current_bits())
    }

    fn block_at(&self, height: u32) -> Result<Option<Block>, SableError> {
        Ok(self.store.read().block_at(height).cloned())
    }

    fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, SableError> {
        Ok(self.store.read().block_by_hash(hash).cloned())
    }

    fn spendable_utxos(
        &self,
        script_pubkey: &[u8],
    ) -> Result<Vec<(OutPoint, UtxoEntry)>, SableError> {
        Ok(self.store.read().spendable_utxos(script_pubkey))
    }
}

impl PoolBackend for Node {
    fn chain_tip(&self) -> (u32, Hash256) {
        let store = self.store.read();
        (store.height(), store.tip_hash())
    }

    fn template(&self, payout_script: Vec<u8>, tag: &[u8]) -> BlockTemplate {
        self.engine.block_template(payout_script, tag)
    }

    fn submit_block(&self, block: Block) -> Result<(), String> {
        Node::submit_block(self, block)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn spendable_utxos(&self, script_pubkey: &[u8]) -> Vec<(OutPoint, UtxoEntry)> {
        self.store.read().spendable_utxos(script_pubkey)
    }

    fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, String> {
        Node::submit_transaction(self, tx).map_err(|e| e.to_string())
    }

    fn fee_estimate(&self, priority: Priority) -> FeeEstimate {
        self.engine.fee_estimate(priority)
    }
}
