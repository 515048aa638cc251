//! Mining job construction and retention.
//!
//! A job binds everything a miner needs for one height: the 76-byte
//! header prefix (header minus nonce), the network and share targets,
//! and the template transactions for block assembly. Jobs get ascending
//! hex ids; the last [`JOB_RETENTION`](sable_core::constants::JOB_RETENTION)
//! are retained so in-flight shares against a recent job still validate,
//! and anything older is stale.

use std::collections::HashMap;
use std::sync::Arc;

use primitive_types::U256;
use serde_json::{json, Value};
use tracing::info;

use sable_core::compact::target_from_bits;
use sable_core::constants::{JOB_RETENTION, SHARE_MULTIPLIER};
use sable_core::types::{Block, Hash256};

use crate::backend::PoolBackend;

/// One unit of work handed to miners.
#[derive(Clone, Debug)]
pub struct MiningJob {
    /// Ascending hex id (`{counter:08x}`).
    pub id: String,
    pub height: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    /// Full target a block hash must beat.
    pub network_target: U256,
    /// Relaxed target a share must beat (network × multiplier).
    pub share_target: U256,
    /// Coinbase value: subsidy + fees.
    pub reward: u64,
    /// Header minus the nonce.
    pub header_prefix: [u8; 76],
    /// The full template block (coinbase + mempool transactions).
    template: Block,
}

impl MiningJob {
    /// Rebuild the full block with a winning nonce filled in.
    pub fn assemble_block(&self, nonce: u32) -> Block {
        let mut block = self.template.clone();
        block.header.nonce = nonce;
        block
    }

    /// Stratum `mining.notify` params for this job.
    ///
    /// The merkle root travels split across the two coinbase slots (the
    /// template is fully assembled server-side, so miners only roll the
    /// nonce); the branch list is therefore empty.
    pub fn notify_params(&self, clean_jobs: bool) -> Value {
        let root = self.merkle_root.to_string();
        json!([
            self.id,
            self.prev_hash.to_string(),
            &root[..32],
            &root[32..],
            [],
            format!("{:08x}", self.template.header.version),
            format!("{:08x}", self.bits),
            format!("{:08x}", self.timestamp),
            clean_jobs,
        ])
    }

    /// The share target as 64-char display hex for `mining.set_target`.
    pub fn share_target_hex(&self) -> String {
        let mut bytes = [0u8; 32];
        self.share_target.to_big_endian(&mut bytes);
        hex::encode(bytes)
    }
}

/// Builds jobs from node templates and retains recent ones.
pub struct JobManager {
    backend: Arc<dyn PoolBackend>,
    payout_script: Vec<u8>,
    tag: Vec<u8>,
    jobs: HashMap<String, Arc<MiningJob>>,
    /// Insertion order for retention.
    order: Vec<String>,
    counter: u64,
    current: Option<Arc<MiningJob>>,
}

impl JobManager {
    pub fn new(backend: Arc<dyn PoolBackend>, payout_script: Vec<u8>, tag: Vec<u8>) -> Self {
        Self {
            backend,
            payout_script,
            tag,
            jobs: HashMap::new(),
            order: Vec::new(),
            counter: 0,
            current: None,
        }
    }

    /// Create a new job when the chain tip moved (or unconditionally
    /// with `force`). Returns the current job either way.
    pub fn refresh(&mut self, force: bool) -> Arc<MiningJob> {
        let (tip_height, _) = self.backend.chain_tip();
        if !force {
            if let Some(current) = &self.current {
                if current.height == tip_height + 1 {
                    return current.clone();
                }
            }
        }

        let template = self
            .backend
            .template(self.payout_script.clone(), &self.tag);
        self.counter += 1;
        let id = format!("{:08x}", self.counter);

        let network_target = target_from_bits(template.block.header.bits).unwrap_or_default();
        let share_target = network_target
            .checked_mul(U256::from(SHARE_MULTIPLIER))
            .unwrap_or(U256::MAX);

        let job = Arc::new(MiningJob {
            id: id.clone(),
            height: template.block.height,
            prev_hash: template.block.header.prev_hash,
            merkle_root: template.block.header.merkle_root,
            timestamp: template.block.header.timestamp,
            bits: template.block.header.bits,
            network_target,
            share_target,
            reward: template.reward,
            header_prefix: template.block.header.serialize_prefix(),
            template: template.block,
        });

        self.jobs.insert(id.clone(), job.clone());
        self.order.push(id.clone());
        while self.order.len() > JOB_RETENTION {
            let retired = self.order.remove(0);
            self.jobs.remove(&retired);
        }
        self.current = Some(job.clone());

        info!(job = %id, height = job.height, "created mining job");
        job
    }

    /// Look up a retained job. `None` means the share is stale.
    pub fn job(&self, id: &str) -> Option<Arc<MiningJob>> {
        self.jobs.get(id).cloned()
    }

    pub fn current(&self) -> Option<Arc<MiningJob>> {
        self.current.clone()
    }

    /// Whether `id` is no longer the current job.
    pub fn is_stale(&self, id: &str) -> bool {
        self.current.as_ref().map(|j| j.id != id).unwrap_or(true)
    }

    /// Ids retired since the last call (no longer retained).
    pub fn retained_ids(&self) -> Vec<String> {
        self.order.clone()
    }
}
