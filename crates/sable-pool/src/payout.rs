//! Payout accounting and the payout sender.
//!
//! On each accepted block the reward splits proportionally across
//! workers' accepted shares (pool fee off the top, integer truncation,
//! remainder retained by the pool) into a pending ledger keyed by
//! address. The sender periodically drains pending balances above the
//! minimum: it captures one snapshot of the pool's mature UTXOs per
//! cycle, pays FIFO by pending-balance age, allows partial payouts when
//! the mature balance runs short, and deducts the network fee from the
//! miner's credit. Ledger state persists to disk after every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sable_core::address::Address;
use sable_core::crypto::{self, KeyPair};
use sable_core::fees::Priority;
use sable_core::types::{Transaction, TxInput, TxOutput};

use crate::backend::PoolBackend;
use crate::error::PoolError;

/// Completed payouts kept in the state file.
const COMPLETED_HISTORY: usize = 100;

/// Fee tiers by authorized-worker count, in basis points. Monotonically
/// non-increasing; more workers, lower fee.
pub const FEE_TIERS: [(usize, u64); 7] = [
    (1, 1000),
    (2, 800),
    (5, 500),
    (10, 300),
    (20, 200),
    (50, 150),
    (100, 100),
];

/// Hard clamp on the dynamic fee, in basis points.
pub const FEE_MIN_BPS: u64 = 100;
pub const FEE_MAX_BPS: u64 = 1000;

const BPS: u64 = 10_000;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The pool fee for a given authorized-worker count.
pub fn dynamic_fee_bps(worker_count: usize) -> u64 {
    let mut fee = FEE_MAX_BPS;
    for (threshold, tier) in FEE_TIERS {
        if worker_count >= threshold {
            fee = tier;
        } else {
            break;
        }
    }
    fee.clamp(FEE_MIN_BPS, FEE_MAX_BPS)
}

/// An accrued balance awaiting payout.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingPayout {
    pub address: String,
    pub amount: u64,
    pub shares: u64,
    pub created_at: u64,
}

/// A payout that made it on-chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletedPayout {
    pub address: String,
    pub amount: u64,
    pub txid: String,
    pub timestamp: u64,
    pub partial: bool,
}

/// Serialized ledger state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    total_paid: u64,
    total_fees: u64,
    blocks_paid: u64,
    completed_payouts: Vec<CompletedPayout>,
    pending_payouts: Vec<PendingPayout>,
}

/// Pending balances, totals, and history.
pub struct PayoutLedger {
    pending: HashMap<String, PendingPayout>,
    completed: Vec<CompletedPayout>,
    total_paid: u64,
    total_fees: u64,
    blocks_paid: u64,
    min_payout: u64,
    state_path: Option<PathBuf>,
}

impl PayoutLedger {
    pub fn new(min_payout: u64) -> Self {
        Self {
            pending: HashMap::new(),
            completed: Vec::new(),
            total_paid: 0,
            total_fees: 0,
            blocks_paid: 0,
            min_payout,
            state_path: None,
        }
    }

    /// Ledger persisted at `path`, restoring prior state when present.
    pub fn with_state_file(min_payout: u64, path: PathBuf) -> Result<Self, PoolError> {
        let mut ledger = Self::new(min_payout);
        if path.exists() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| PoolError::Persist(e.to_string()))?;
            let state: LedgerState =
                serde_json::from_str(&data).map_err(|e| PoolError::Persist(e.to_string()))?;
            ledger.total_paid = state.total_paid;
            ledger.total_fees = state.total_fees;
            ledger.blocks_paid = state.blocks_paid;
            ledger.completed = state.completed_payouts;
            for pending in state.pending_payouts {
                ledger.pending.insert(pending.address.clone(), pending);
            }
            info!(
                pending = ledger.pending.len(),
                blocks = ledger.blocks_paid,
                "restored pool ledger"
            );
        }
        ledger.state_path = Some(path);
        Ok(ledger)
    }

    /// Compute the proportional split of one block reward.
    ///
    /// `pool_fee = reward × fee_bps / 10_000` comes off the top; each
    /// worker gets `payable × shares / total_shares` with integer
    /// truncation (the remainder stays with the pool).
    pub fn calculate_payouts(
        reward: u64,
        shares_by_address: &HashMap<String, u64>,
        fee_bps: u64,
    ) -> HashMap<String, u64> {
        let total_shares: u64 = shares_by_address.values().sum();
        if total_shares == 0 {
            return HashMap::new();
        }
        let pool_fee = ((reward as u128) * (fee_bps as u128) / (BPS as u128)) as u64;
        let payable = reward - pool_fee;

        shares_by_address
            .iter()
            .filter_map(|(address, shares)| {
                let credit =
                    ((payable as u128) * (*shares as u128) / (total_shares as u128)) as u64;
                (credit > 0).then(|| (address.clone(), credit))
            })
            .collect()
    }

    /// Credit one accepted block into the pending ledger.
    pub fn process_block_reward(
        &mut self,
        reward: u64,
        shares_by_address: &HashMap<String, u64>,
        fee_bps: u64,
    ) -> Result<(), PoolError> {
        let payouts = Self::calculate_payouts(reward, shares_by_address, fee_bps);
        let now = unix_now();
        for (address, amount) in payouts {
            let shares = shares_by_address.get(&address).copied().unwrap_or(0);
            self.pending
                .entry(address.clone())
                .and_modify(|p| {
                    p.amount += amount;
                    p.shares += shares;
                })
                .or_insert(PendingPayout {
                    address,
                    amount,
                    shares,
                    created_at: now,
                });
        }
        self.blocks_paid += 1;
        self.total_fees += ((reward as u128) * (fee_bps as u128) / (BPS as u128)) as u64;
        self.persist()
    }

    /// Pending balances at or above the minimum, FIFO by creation time.
    pub fn due(&self) -> Vec<PendingPayout> {
        let mut due: Vec<PendingPayout> = self
            .pending
            .values()
            .filter(|p| p.amount >= self.min_payout)
            .cloned()
            .collect();
        due.sort_by_key(|p| (p.created_at, p.address.clone()));
        due
    }

    /// Record a successful payout of `amount` toward an address. A
    /// partial payment reduces the balance; a full payment clears it.
    pub fn settle(&mut self, address: &str, amount: u64, txid: String) -> Result<(), PoolError> {
        let mut partial = false;
        let settled_in_full = match self.pending.get_mut(address) {
            Some(pending) if pending.amount > amount => {
                pending.amount -= amount;
                partial = true;
                false
            }
            Some(_) => true,
            None => false,
        };
        if settled_in_full {
            self.pending.remove(address);
        }
        self.total_paid += amount;
        self.completed.push(CompletedPayout {
            address: address.to_string(),
            amount,
            txid,
            timestamp: unix_now(),
            partial,
        });
        if self.completed.len() > COMPLETED_HISTORY {
            let excess = self.completed.len() - COMPLETED_HISTORY;
            self.completed.drain(..excess);
        }
        self.persist()
    }

    pub fn pending_for(&self, address: &str) -> Option<&PendingPayout> {
        self.pending.get(address)
    }

    pub fn pending_total(&self) -> u64 {
        self.pending.values().map(|p| p.amount).sum()
    }

    pub fn total_paid(&self) -> u64 {
        self.total_paid
    }

    pub fn total_fees(&self) -> u64 {
        self.total_fees
    }

    pub fn blocks_paid(&self) -> u64 {
        self.blocks_paid
    }

    pub fn min_payout(&self) -> u64 {
        self.min_payout
    }

    pub fn completed(&self) -> &[CompletedPayout] {
        &self.completed
    }

    /// Write the state file (temp-then-rename). A persistence failure
    /// aborts the mutating call so disk and memory cannot diverge
    /// silently.
    fn persist(&self) -> Result<(), PoolError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let state = LedgerState {
            total_paid: self.total_paid,
            total_fees: self.total_fees,
            blocks_paid: self.blocks_paid,
            completed_payouts: self.completed.clone(),
            pending_payouts: self.pending.values().cloned().collect(),
        };
        let json =
            serde_json::to_string_pretty(&state).map_err(|e| PoolError::Persist(e.to_string()))?;
        write_atomically(path, json.as_bytes()).map_err(|e| PoolError::Persist(e.to_string()))
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// One payout attempt's result, logged and surfaced to the stats page.
#[derive(Clone, Debug)]
pub struct PayoutResult {
    pub address: String,
    pub amount: u64,
    pub txid: Option<String>,
    pub error: Option<String>,
}

/// Drain due balances from the pool's mature UTXOs.
///
/// Captures the mature snapshot once at cycle start; the transaction
/// builder consumes only from that snapshot, so blocks arriving
/// mid-cycle cannot shift maturity out from under a payment. The
/// network fee (from the node's estimator) is deducted from each
/// miner's credit, with change back to the pool.
pub fn run_payout_cycle(
    ledger: &mut PayoutLedger,
    backend: &Arc<dyn PoolBackend>,
    pool_keypair: &KeyPair,
    pool_address: &Address,
) -> Vec<PayoutResult> {
    let mut results = Vec::new();

    let pool_script = pool_address.script_pubkey();
    let mut snapshot = backend.spendable_utxos(&pool_script);
    snapshot.sort_by(|a, b| b.1.output.value.cmp(&a.1.output.value).then(a.0.cmp(&b.0)));
    let mut available: u64 = snapshot.iter().map(|(_, u)| u.output.value).sum();

    if available < ledger.min_payout() {
        info!(
            available,
            needed = ledger.min_payout(),
            "waiting for mature pool balance"
        );
        return results;
    }

    let network_fee = backend.fee_estimate(Priority::Normal).estimated_fee;

    for due in ledger.due() {
        // Full payment when the snapshot covers it, partial otherwise.
        let amount = if available >= due.amount {
            due.amount
        } else if available >= ledger.min_payout() {
            available
        } else {
            break;
        };

        match send_single_payout(
            &mut snapshot,
            backend,
            pool_keypair,
            pool_address,
            &due.address,
            amount,
            network_fee,
        ) {
            Ok(txid) => {
                available -= amount;
                if let Err(e) = ledger.settle(&due.address, amount, txid.clone()) {
                    warn!(error = %e, "ledger persist failed after payout");
                }
                info!(
                    to = &due.address[..due.address.len().min(20)],
                    amount, %txid, "payout sent"
                );
                results.push(PayoutResult {
                    address: due.address,
                    amount,
                    txid: Some(txid),
                    error: None,
                });
            }
            Err(e) => {
                warn!(
                    to = &due.address[..due.address.len().min(20)],
                    amount,
                    error = %e,
                    "payout deferred"
                );
                results.push(PayoutResult {
                    address: due.address,
                    amount,
                    txid: None,
                    error: Some(e.to_string()),
                });
            }
        }

        if available < ledger.min_payout() {
            break;
        }
    }

    results
}

/// Build, sign, and submit one payout transaction from the snapshot.
///
/// The miner receives `amount − network_fee`; consumed UTXOs are
/// removed from the snapshot so later payouts in the cycle cannot
/// double-select them.
fn send_single_payout(
    snapshot: &mut Vec<(sable_core::types::OutPoint, sable_core::types::UtxoEntry)>,
    backend: &Arc<dyn PoolBackend>,
    pool_keypair: &KeyPair,
    pool_address: &Address,
    to_address: &str,
    amount: u64,
    network_fee: u64,
) -> Result<String, PoolError> {
    let recipient = Address::decode(to_address)
        .map_err(|_| PoolError::InvalidAddress(to_address.to_string()))?;

    let net_amount = amount
        .checked_sub(network_fee)
        .filter(|v| *v > 0)
        .ok_or(PoolError::InsufficientFunds {
            have: amount,
            need: network_fee + 1,
        })?;

    // Select from the snapshot until the gross amount is covered.
    let mut selected = Vec::new();
    let mut total: u64 = 0;
    while total < amount {
        let Some(next) = snapshot.first().cloned() else {
            return Err(PoolError::InsufficientFunds {
                have: total,
                need: amount,
            });
        };
        snapshot.remove(0);
        total += next.1.output.value;
        selected.push(next);
    }
    if selected.is_empty() {
        return Err(PoolError::NoMatureUtxo);
    }

    let change = total - net_amount - network_fee;

    let mut tx = Transaction {
        version: 1,
        inputs: selected
            .iter()
            .map(|(outpoint, entry)| {
                let mut input = TxInput::new(*outpoint);
                input.prev_output = Some(entry.output.clone());
                input
            })
            .collect(),
        outputs: vec![TxOutput {
            value: net_amount,
            script_pubkey: recipient.script_pubkey(),
        }],
        locktime: 0,
    };
    if change > 0 {
        tx.outputs.push(TxOutput {
            value: change,
            script_pubkey: pool_address.script_pubkey(),
        });
    }

    for index in 0..tx.inputs.len() {
        crypto::sign_input(&mut tx, index, pool_keypair)
            .map_err(|e| PoolError::Signing(e.to_string()))?;
    }

    backend
        .submit_transaction(tx)
        .map(|txid| txid.to_string())
        .map_err(PoolError::BlockRejected)
}
