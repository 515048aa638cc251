//! Connected-miner registry.
//!
//! Workers authorize with `<address>[.<worker>]`; the address must carry
//! the mainnet prefix, be at least 30 characters, and decode as
//! Base58Check. Per-worker counters feed the payout split and the stats
//! surface.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use sable_core::address::Address;

use crate::error::PoolError;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One connected miner.
#[derive(Clone, Debug, Serialize)]
pub struct Worker {
    pub id: u64,
    /// Remote peer label (ip:port).
    pub peer: String,
    /// Payout address once authorized.
    pub wallet_address: Option<String>,
    pub worker_name: String,
    pub authorized: bool,
    pub connected_at: u64,
    pub last_activity: u64,
    pub shares_accepted: u64,
    pub shares_stale: u64,
    pub shares_rejected: u64,
    pub blocks_found: u64,
}

/// How a submission resolved, for counter purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareOutcome {
    Accepted,
    AcceptedBlock,
    Stale,
    Rejected,
}

/// Registry of all connections, keyed by worker id.
pub struct WorkerSet {
    workers: RwLock<HashMap<u64, Worker>>,
    next_id: RwLock<u64>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            next_id: RwLock::new(1),
        }
    }

    /// Register a fresh connection (unauthorized).
    pub fn connect(&self, peer: String) -> u64 {
        let mut next = self.next_id.write();
        let id = *next;
        *next += 1;
        let now = unix_now();
        self.workers.write().insert(
            id,
            Worker {
                id,
                peer,
                wallet_address: None,
                worker_name: "default".into(),
                authorized: false,
                connected_at: now,
                last_activity: now,
                shares_accepted: 0,
                shares_stale: 0,
                shares_rejected: 0,
                blocks_found: 0,
            },
        );
        id
    }

    pub fn disconnect(&self, id: u64) -> Option<Worker> {
        self.workers.write().remove(&id)
    }

    /// Authorize with `<address>[.<worker>]`.
    ///
    /// The address must start with `S`, be at least 30 characters, and
    /// decode as Base58Check.
    pub fn authorize(&self, id: u64, username: &str) -> Result<(), PoolError> {
        let (address, name) = match username.split_once('.') {
            Some((addr, name)) => (addr, name),
            None => (username, "default"),
        };

        if !address.starts_with('S') || address.len() < 30 {
            return Err(PoolError::InvalidAddress(address.to_string()));
        }
        Address::decode(address).map_err(|_| PoolError::InvalidAddress(address.to_string()))?;

        let mut workers = self.workers.write();
        let worker = workers.get_mut(&id).ok_or(PoolError::NotAuthorized)?;
        worker.wallet_address = Some(address.to_string());
        worker.worker_name = name.to_string();
        worker.authorized = true;
        worker.last_activity = unix_now();
        info!(worker = id, address, name, "worker authorized");
        Ok(())
    }

    pub fn is_authorized(&self, id: u64) -> bool {
        self.workers
            .read()
            .get(&id)
            .map(|w| w.authorized)
            .unwrap_or(false)
    }

    /// Record a submission outcome against a worker's counters.
    pub fn record_share(&self, id: u64, outcome: ShareOutcome) {
        let mut workers = self.workers.write();
        if let Some(worker) = workers.get_mut(&id) {
            worker.last_activity = unix_now();
            match outcome {
                ShareOutcome::Accepted => worker.shares_accepted += 1,
                ShareOutcome::AcceptedBlock => {
                    worker.shares_accepted += 1;
                    worker.blocks_found += 1;
                }
                ShareOutcome::Stale => worker.shares_stale += 1,
                ShareOutcome::Rejected => worker.shares_rejected += 1,
            }
        }
    }

    /// Accepted shares summed per payout address.
    pub fn shares_by_address(&self) -> HashMap<String, u64> {
        let mut shares: HashMap<String, u64> = HashMap::new();
        for worker in self.workers.read().values() {
            if let Some(address) = &worker.wallet_address {
                *shares.entry(address.clone()).or_default() += worker.shares_accepted;
            }
        }
        shares
    }

    /// Reset the per-block share counters after a payout round. Pending
    /// balances live in the payout ledger and are untouched.
    pub fn reset_shares(&self) {
        for worker in self.workers.write().values_mut() {
            worker.shares_accepted = 0;
            worker.shares_stale = 0;
            worker.shares_rejected = 0;
        }
    }

    pub fn authorized_count(&self) -> usize {
        self.workers.read().values().filter(|w| w.authorized).count()
    }

    pub fn connection_count(&self) -> usize {
        self.workers.read().len()
    }

    pub fn snapshot(&self) -> Vec<Worker> {
        self.workers.read().values().cloned().collect()
    }

    /// Drop workers idle past `timeout_secs`. Returns the culled ids.
    pub fn cull_inactive(&self, timeout_secs: u64) -> Vec<u64> {
        let now = unix_now();
        let stale: Vec<u64> = self
            .workers
            .read()
            .values()
            .filter(|w| now.saturating_sub(w.last_activity) > timeout_secs)
            .map(|w| w.id)
            .collect();
        let mut workers = self.workers.write();
        for id in &stale {
            workers.remove(id);
        }
        stale
    }
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_core::address::Network;

    fn valid_address() -> String {
        Address::new(Network::Mainnet, [0x42; 20]).to_string()
    }

    #[test]
    fn connect_assigns_sequential_ids() {
        let set = WorkerSet::new();
        let a = set.connect("1.2.3.4:1".into());
        let b = set.connect("1.2.3.4:2".into());
        assert_ne!(a, b);
        assert_eq!(set.connection_count(), 2);
        assert_eq!(set.authorized_count(), 0);
    }

    #[test]
    fn authorize_with_worker_suffix() {
        let set = WorkerSet::new();
        let id = set.connect("peer".into());
        let username = format!("{}.rig1", valid_address());
        set.authorize(id, &username).unwrap();
        assert!(set.is_authorized(id));
        let snapshot = set.snapshot();
        assert_eq!(snapshot[0].worker_name, "rig1");
    }

    #[test]
    fn authorize_rejects_wrong_prefix() {
        let set = WorkerSet::new();
        let id = set.connect("peer".into());
        let err = set.authorize(id, "Xnotanaddressbutlongenough1234567");
        assert!(matches!(err, Err(PoolError::InvalidAddress(_))));
        assert!(!set.is_authorized(id));
    }

    #[test]
    fn authorize_rejects_short_address() {
        let set = WorkerSet::new();
        let id = set.connect("peer".into());
        assert!(matches!(
            set.authorize(id, "Sshort"),
            Err(PoolError::InvalidAddress(_))
        ));
    }

    #[test]
    fn authorize_rejects_bad_checksum() {
        let set = WorkerSet::new();
        let id = set.connect("peer".into());
        let mut addr = valid_address();
        // Corrupt one character while keeping prefix and length.
        let flip = if addr.ends_with('2') { '3' } else { '2' };
        addr.pop();
        addr.push(flip);
        assert!(matches!(
            set.authorize(id, &addr),
            Err(PoolError::InvalidAddress(_))
        ));
    }

    #[test]
    fn share_counters_accumulate() {
        let set = WorkerSet::new();
        let id = set.connect("peer".into());
        set.authorize(id, &valid_address()).unwrap();

        set.record_share(id, ShareOutcome::Accepted);
        set.record_share(id, ShareOutcome::Accepted);
        set.record_share(id, ShareOutcome::AcceptedBlock);
        set.record_share(id, ShareOutcome::Stale);
        set.record_share(id, ShareOutcome::Rejected);

        let worker = &set.snapshot()[0];
        assert_eq!(worker.shares_accepted, 3);
        assert_eq!(worker.blocks_found, 1);
        assert_eq!(worker.shares_stale, 1);
        assert_eq!(worker.shares_rejected, 1);
    }

    #[test]
    fn shares_group_by_address_across_workers() {
        let set = WorkerSet::new();
        let addr = valid_address();
        let a = set.connect("rig-a".into());
        let b = set.connect("rig-b".into());
        set.authorize(a, &format!("{addr}.a")).unwrap();
        set.authorize(b, &format!("{addr}.b")).unwrap();
        set.record_share(a, ShareOutcome::Accepted);
        set.record_share(b, ShareOutcome::Accepted);

        let shares = set.shares_by_address();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[&addr], 2);
    }

    #[test]
    fn reset_clears_counters_only() {
        let set = WorkerSet::new();
        let id = set.connect("peer".into());
        set.authorize(id, &valid_address()).unwrap();
        set.record_share(id, ShareOutcome::Accepted);
        set.reset_shares();

        let worker = &set.snapshot()[0];
        assert_eq!(worker.shares_accepted, 0);
        assert!(worker.authorized);
    }

    #[test]
    fn cull_inactive_removes_idle() {
        let set = WorkerSet::new();
        let id = set.connect("peer".into());
        // Zero timeout: anything older than "now" is idle; a freshly
        // connected worker has last_activity == now and survives.
        assert!(set.cull_inactive(3600).is_empty());
        assert_eq!(set.connection_count(), 1);
        let _ = id;
    }
}
