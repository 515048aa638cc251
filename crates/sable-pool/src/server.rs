//! The Stratum pool server.
//!
//! One tokio task per connection reading newline-delimited JSON, a
//! writer task per connection fed by an unbounded channel, a job
//! updater polling the node every few seconds, and a payout task
//! draining the ledger. Share validation and block submission run
//! inline on the connection task; a found block triggers payout
//! distribution and an immediate job broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use sable_core::address::Address;
use sable_core::crypto::KeyPair;

use crate::backend::PoolBackend;
use crate::config::PoolConfig;
use crate::error::{PoolError, ShareError};
use crate::job::JobManager;
use crate::payout::{self, PayoutLedger};
use crate::rpc::{self, StratumRequest, StratumResponse};
use crate::share::ShareValidator;
use crate::worker::{ShareOutcome, WorkerSet};

/// Messages queued to a connection's writer task.
type Outbound = mpsc::UnboundedSender<String>;

/// The pool: job production, share validation, workers, payouts.
pub struct PoolServer {
    config: PoolConfig,
    backend: Arc<dyn PoolBackend>,
    jobs: Mutex<JobManager>,
    shares: Mutex<ShareValidator>,
    workers: WorkerSet,
    ledger: Mutex<PayoutLedger>,
    pool_keypair: KeyPair,
    pool_address: Address,
    connections: Mutex<HashMap<u64, Outbound>>,
    fee_bps: AtomicU64,
    blocks_found: AtomicU64,
    blocks_accepted: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl PoolServer {
    pub fn new(
        config: PoolConfig,
        backend: Arc<dyn PoolBackend>,
        pool_keypair: KeyPair,
    ) -> Result<Arc<Self>, PoolError> {
        let pool_address = Address::new(
            sable_core::address::Network::Mainnet,
            pool_keypair.pubkey_hash(),
        );
        let ledger = PayoutLedger::with_state_file(config.min_payout, config.state_path.clone())?;
        let jobs = JobManager::new(
            backend.clone(),
            pool_address.script_pubkey(),
            config.coinbase_tag.clone(),
        );
        let (shutdown, _) = watch::channel(false);
        let fee_bps = AtomicU64::new(config.base_fee_bps);
        Ok(Arc::new(Self {
            config,
            backend,
            jobs: Mutex::new(jobs),
            shares: Mutex::new(ShareValidator::new()),
            workers: WorkerSet::new(),
            ledger: Mutex::new(ledger),
            pool_keypair,
            pool_address,
            connections: Mutex::new(HashMap::new()),
            fee_bps,
            blocks_found: AtomicU64::new(0),
            blocks_accepted: AtomicU64::new(0),
            shutdown,
        }))
    }

    pub fn pool_address(&self) -> &Address {
        &self.pool_address
    }

    /// Current pool fee in basis points (dynamic or static).
    pub fn current_fee_bps(&self) -> u64 {
        self.fee_bps.load(Ordering::Relaxed)
    }

    pub fn blocks_found(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }

    pub fn blocks_accepted(&self) -> u64 {
        self.blocks_accepted.load(Ordering::Relaxed)
    }

    pub fn workers(&self) -> &WorkerSet {
        &self.workers
    }

    /// The job currently being worked (creating one if none exists yet).
    pub fn current_job(&self) -> Arc<crate::job::MiningJob> {
        self.jobs.lock().refresh(false)
    }

    pub fn ledger(&self) -> &Mutex<PayoutLedger> {
        &self.ledger
    }

    /// Serve Stratum connections until shutdown.
    ///
    /// Spawns the job updater and payout sender, then accepts
    /// connections. Shutdown order: the acceptor stops first, then
    /// background tasks observe the flag; ledger state is already
    /// durable (persisted on every mutation).
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.stratum_addr()).await?;
        info!(addr = %self.config.stratum_addr(), "stratum listening");

        let updater = tokio::spawn(self.clone().job_updater());
        let payouts = tokio::spawn(self.clone().payout_task());

        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer.to_string()).await;
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        updater.abort();
        payouts.abort();
        info!("stratum listener stopped");
        Ok(())
    }

    /// Signal every loop to stop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn handle_connection(self: &Arc<Self>, stream: TcpStream, peer: String) {
        let worker_id = self.workers.connect(peer.clone());
        debug!(worker = worker_id, %peer, "connected");

        let (reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.connections.lock().insert(worker_id, tx.clone());

        let writer_task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        let ping_interval = Duration::from_secs(self.config.idle_timeout_secs.max(30) / 2);
        loop {
            match tokio::time::timeout(ping_interval, lines.next_line()).await {
                Ok(Ok(Some(line))) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StratumRequest>(&line) {
                        Ok(request) => {
                            let responses = self.process(worker_id, request);
                            for out in responses {
                                if tx.send(out).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            debug!(worker = worker_id, error = %e, "unparseable line");
                            let _ = tx.send(
                                StratumResponse::err(None, 1, "parse error").to_line(),
                            );
                        }
                    }
                }
                Ok(Ok(None)) | Ok(Err(_)) => break,
                Err(_) => {
                    // Idle: keepalive ping; the cull task handles truly
                    // dead peers.
                    if tx.send(rpc::ping_line()).is_err() {
                        break;
                    }
                }
            }
        }

        self.connections.lock().remove(&worker_id);
        self.workers.disconnect(worker_id);
        writer_task.abort();
        debug!(worker = worker_id, "disconnected");
    }

    /// Handle one request; returns the lines to send, response first.
    pub fn process(self: &Arc<Self>, worker_id: u64, request: StratumRequest) -> Vec<String> {
        match request.method.as_str() {
            "mining.subscribe" => {
                vec![StratumResponse::ok(request.id, json!([[], "", 4])).to_line()]
            }
            "mining.authorize" => self.handle_authorize(worker_id, request),
            "mining.submit" => self.handle_submit(worker_id, request),
            "mining.extranonce.subscribe" => {
                vec![StratumResponse::ok(request.id, json!(true)).to_line()]
            }
            other => {
                debug!(worker = worker_id, method = other, "unknown method");
                vec![StratumResponse::err(request.id, 20, "unknown method").to_line()]
            }
        }
    }

    fn handle_authorize(self: &Arc<Self>, worker_id: u64, request: StratumRequest) -> Vec<String> {
        let Some(username) = request.params.get(0).and_then(Value::as_str) else {
            return vec![StratumResponse::err(request.id, 24, "missing username").to_line()];
        };

        match self.workers.authorize(worker_id, username) {
            Ok(()) => {
                self.update_dynamic_fee();
                let mut out = vec![StratumResponse::ok(request.id, json!(true)).to_line()];
                // Send work right away.
                let job = self.jobs.lock().refresh(false);
                out.push(rpc::set_target_line(&job));
                out.push(rpc::notify_line(&job, true));
                out
            }
            Err(e) => vec![StratumResponse::err(request.id, 24, &e.to_string()).to_line()],
        }
    }

    fn handle_submit(self: &Arc<Self>, worker_id: u64, request: StratumRequest) -> Vec<String> {
        if !self.workers.is_authorized(worker_id) {
            return vec![StratumResponse::err(request.id, 24, "not authorized").to_line()];
        }

        let params = request.params.as_array().cloned().unwrap_or_default();
        if params.len() < 5 {
            return vec![StratumResponse::err(request.id, 25, "invalid params").to_line()];
        }
        let job_id = params[1].as_str().unwrap_or_default().to_string();
        let extranonce2 = params[2].as_str().unwrap_or_default().to_string();
        let nonce_hex = params[4].as_str().unwrap_or_default().to_string();
        let hash_hint = params.get(5).and_then(Value::as_str);

        let Some(job) = self.jobs.lock().job(&job_id) else {
            self.workers.record_share(worker_id, ShareOutcome::Stale);
            return vec![StratumResponse::share_err(request.id, &ShareError::StaleJob).to_line()];
        };

        let share = {
            let mut shares = self.shares.lock();
            shares.validate(&job, &extranonce2, &nonce_hex, hash_hint)
        };

        match share {
            Ok(share) if share.is_block_candidate => {
                info!(worker = worker_id, hash = %share.hash, height = job.height, "block candidate");
                self.blocks_found.fetch_add(1, Ordering::Relaxed);
                self.workers.record_share(worker_id, ShareOutcome::AcceptedBlock);

                let block = job.assemble_block(share.nonce);
                let mut out = vec![StratumResponse::ok(request.id, json!(true)).to_line()];
                match self.backend.submit_block(block) {
                    Ok(()) => {
                        self.blocks_accepted.fetch_add(1, Ordering::Relaxed);
                        self.distribute_block_reward(job.reward);
                        self.broadcast(rpc::block_found_line(job.height, "worker"));
                        self.broadcast(rpc::block_accepted_line(job.height));
                        // Fresh work on the new tip for everyone.
                        let next = self.jobs.lock().refresh(true);
                        self.retire_old_share_state();
                        self.broadcast(rpc::notify_line(&next, true));
                        out.push(rpc::notify_line(&next, true));
                    }
                    Err(reason) => {
                        warn!(height = job.height, reason, "block rejected by node");
                        self.broadcast(rpc::block_rejected_line(job.height, &reason));
                    }
                }
                out
            }
            Ok(_) => {
                self.workers.record_share(worker_id, ShareOutcome::Accepted);
                vec![StratumResponse::ok(request.id, json!(true)).to_line()]
            }
            Err(err) => {
                let outcome = if err == ShareError::StaleJob {
                    ShareOutcome::Stale
                } else {
                    ShareOutcome::Rejected
                };
                self.workers.record_share(worker_id, outcome);
                vec![StratumResponse::share_err(request.id, &err).to_line()]
            }
        }
    }

    /// Split one block reward into the pending ledger and reset the
    /// per-block share counters.
    fn distribute_block_reward(&self, reward: u64) {
        let shares = self.workers.shares_by_address();
        let fee_bps = self.current_fee_bps();
        if let Err(e) = self
            .ledger
            .lock()
            .process_block_reward(reward, &shares, fee_bps)
        {
            warn!(error = %e, "reward distribution not persisted");
            return;
        }
        self.workers.reset_shares();
    }

    fn update_dynamic_fee(&self) {
        if !self.config.dynamic_fee {
            return;
        }
        let fee = payout::dynamic_fee_bps(self.workers.authorized_count());
        let old = self.fee_bps.swap(fee, Ordering::Relaxed);
        if old != fee {
            info!(old, new = fee, workers = self.workers.authorized_count(), "pool fee updated");
        }
    }

    fn retire_old_share_state(&self) {
        let live = self.jobs.lock().retained_ids();
        self.shares.lock().retain_jobs(&live);
    }

    fn broadcast(&self, line: String) {
        let connections = self.connections.lock();
        for sender in connections.values() {
            let _ = sender.send(line.clone());
        }
    }

    /// Periodic job refresh: new work on height changes, fee and
    /// idle-worker upkeep.
    async fn job_updater(self: Arc<Self>) {
        let mut last_job_id = String::new();
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.job_refresh_secs)) => {}
                _ = shutdown.changed() => break,
            }

            let job = self.jobs.lock().refresh(false);
            if job.id != last_job_id {
                last_job_id = job.id.clone();
                self.retire_old_share_state();
                self.broadcast(rpc::set_target_line(&job));
                self.broadcast(rpc::notify_line(&job, true));
            }
            self.update_dynamic_fee();
            for culled in self.workers.cull_inactive(self.config.idle_timeout_secs) {
                self.connections.lock().remove(&culled);
            }
        }
    }

    /// Periodic payout cycle.
    async fn payout_task(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.payout_interval_secs)) => {}
                _ = shutdown.changed() => break,
            }
            self.run_payouts();
        }
    }

    /// One payout cycle over a snapshot of the pool's mature UTXOs.
    pub fn run_payouts(&self) -> Vec<payout::PayoutResult> {
        let mut ledger = self.ledger.lock();
        payout::run_payout_cycle(
            &mut ledger,
            &self.backend,
            &self.pool_keypair,
            &self.pool_address,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestBackend;
    use primitive_types::U256;
    use sable_core::compact::hash_to_u256;
    use sable_core::constants::{COIN, INITIAL_REWARD};
    use sable_core::types::sha256d;

    fn test_server(backend: Arc<TestBackend>) -> Arc<PoolServer> {
        let dir = tempfile::tempdir().unwrap();
        let config = PoolConfig {
            state_path: dir.path().join("pool_state.json"),
            min_payout: COIN,
            ..PoolConfig::default()
        };
        // Leak the tempdir so the state file outlives the test setup.
        std::mem::forget(dir);
        PoolServer::new(config, backend, KeyPair::generate()).unwrap()
    }

    fn miner_username() -> String {
        let kp = KeyPair::generate();
        Address::new(sable_core::address::Network::Mainnet, kp.pubkey_hash()).to_string()
    }

    fn connect_and_authorize(server: &Arc<PoolServer>) -> (u64, String) {
        let worker_id = server.workers.connect("test:1".into());
        let username = miner_username();
        let out = server.process(
            worker_id,
            StratumRequest {
                id: Some(json!(1)),
                method: "mining.authorize".into(),
                params: json!([username.clone(), "x"]),
            },
        );
        assert!(out[0].contains("true"), "authorize failed: {}", out[0]);
        (worker_id, username)
    }

    /// Grind a share nonce for the current job.
    fn grind(job: &crate::job::MiningJob, below: U256) -> u32 {
        let mut header = [0u8; 80];
        header[..76].copy_from_slice(&job.header_prefix);
        for nonce in 0u32.. {
            header[76..].copy_from_slice(&nonce.to_le_bytes());
            if hash_to_u256(&sha256d(&header)) < below {
                return nonce;
            }
        }
        unreachable!()
    }

    #[test]
    fn subscribe_returns_extranonce_layout() {
        let server = test_server(TestBackend::new());
        let worker_id = server.workers.connect("test:1".into());
        let out = server.process(
            worker_id,
            StratumRequest {
                id: Some(json!(7)),
                method: "mining.subscribe".into(),
                params: json!([]),
            },
        );
        let value: Value = serde_json::from_str(out[0].trim()).unwrap();
        assert_eq!(value["result"], json!([[], "", 4]));
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn authorize_sends_target_and_job() {
        let server = test_server(TestBackend::new());
        let worker_id = server.workers.connect("test:1".into());
        let out = server.process(
            worker_id,
            StratumRequest {
                id: Some(json!(1)),
                method: "mining.authorize".into(),
                params: json!([miner_username()]),
            },
        );
        assert_eq!(out.len(), 3);
        assert!(out[1].contains("mining.set_target"));
        assert!(out[2].contains("mining.notify"));
        assert!(server.workers.is_authorized(worker_id));
    }

    #[test]
    fn authorize_rejects_bad_address() {
        let server = test_server(TestBackend::new());
        let worker_id = server.workers.connect("test:1".into());
        let out = server.process(
            worker_id,
            StratumRequest {
                id: Some(json!(1)),
                method: "mining.authorize".into(),
                params: json!(["Bmalformed.worker"]),
            },
        );
        assert!(out[0].contains("error"));
        assert!(!server.workers.is_authorized(worker_id));
    }

    #[test]
    fn submit_requires_authorization() {
        let server = test_server(TestBackend::new());
        let worker_id = server.workers.connect("test:1".into());
        let out = server.process(
            worker_id,
            StratumRequest {
                id: Some(json!(2)),
                method: "mining.submit".into(),
                params: json!(["u", "job", "00", "ntime", "00000000"]),
            },
        );
        assert!(out[0].contains("not authorized"));
    }

    #[test]
    fn submit_against_unknown_job_is_stale() {
        let server = test_server(TestBackend::new());
        let (worker_id, username) = connect_and_authorize(&server);
        let out = server.process(
            worker_id,
            StratumRequest {
                id: Some(json!(3)),
                method: "mining.submit".into(),
                params: json!([username.as_str(), "ffffffff", "00", "t", "00000000"]),
            },
        );
        assert!(out[0].contains("stale job"));
        let worker = &server.workers.snapshot()[0];
        assert_eq!(worker.shares_stale, 1);
    }

    #[test]
    fn valid_share_accepted_and_counted() {
        let server = test_server(TestBackend::new());
        let (worker_id, username) = connect_and_authorize(&server);
        let job = server.jobs.lock().current().unwrap();
        let nonce = grind(&job, job.share_target);

        let out = server.process(
            worker_id,
            StratumRequest {
                id: Some(json!(4)),
                method: "mining.submit".into(),
                params: json!([username.as_str(), job.id.as_str(), "ab", "t", format!("{nonce:08x}")]),
            },
        );
        let value: Value = serde_json::from_str(out[0].trim()).unwrap();
        assert_eq!(value["result"], true);
        let worker = &server.workers.snapshot()[0];
        assert!(worker.shares_accepted >= 1);
    }

    #[test]
    fn duplicate_share_rejected_and_counted() {
        let server = test_server(TestBackend::new());
        let (worker_id, username) = connect_and_authorize(&server);
        let job = server.jobs.lock().current().unwrap();
        let nonce = format!("{:08x}", grind(&job, job.share_target));

        let submit = |id: u64| {
            server.process(
                worker_id,
                StratumRequest {
                    id: Some(json!(id)),
                    method: "mining.submit".into(),
                    params: json!([username.as_str(), job.id.as_str(), "ab", "t", nonce.as_str()]),
                },
            )
        };
        submit(1);
        let out = submit(2);
        assert!(out[0].contains("duplicate share"));
    }

    #[test]
    fn block_candidate_connects_and_distributes() {
        let backend = TestBackend::new();
        let server = test_server(backend.clone());
        let (worker_id, username) = connect_and_authorize(&server);

        // Earn a plain share first so the payout split has weight.
        let job = server.jobs.lock().current().unwrap();
        let tip_before = backend.chain_tip().0;

        let nonce = grind(&job, job.network_target);
        let out = server.process(
            worker_id,
            StratumRequest {
                id: Some(json!(5)),
                method: "mining.submit".into(),
                params: json!([username.as_str(), job.id.as_str(), "cd", "t", format!("{nonce:08x}")]),
            },
        );
        let value: Value = serde_json::from_str(out[0].trim()).unwrap();
        assert_eq!(value["result"], true);

        // The block landed on the node's chain.
        assert_eq!(backend.chain_tip().0, tip_before + 1);
        assert_eq!(server.blocks_found(), 1);
        assert_eq!(server.blocks_accepted(), 1);

        // Reward credited to the miner's address, counters reset.
        let ledger = server.ledger().lock();
        let pending = ledger.pending_for(&username).unwrap();
        let fee = INITIAL_REWARD * server.current_fee_bps() / 10_000;
        assert_eq!(pending.amount, INITIAL_REWARD - fee);
        drop(ledger);
        assert_eq!(server.workers.snapshot()[0].shares_accepted, 0);
        assert_eq!(server.workers.snapshot()[0].blocks_found, 1);
    }

    #[test]
    fn dynamic_fee_follows_worker_count() {
        let server = test_server(TestBackend::new());
        assert_eq!(server.current_fee_bps(), 500); // base before anyone joins
        connect_and_authorize(&server);
        assert_eq!(server.current_fee_bps(), 1000); // one worker tier
    }

    #[test]
    fn unknown_method_errors() {
        let server = test_server(TestBackend::new());
        let worker_id = server.workers.connect("test:1".into());
        let out = server.process(
            worker_id,
            StratumRequest {
                id: Some(json!(9)),
                method: "mining.bogus".into(),
                params: json!([]),
            },
        );
        assert!(out[0].contains("unknown method"));
    }

    #[test]
    fn payout_cycle_pays_mature_balance() {
        let backend = TestBackend::easy();
        let server = test_server(backend.clone());

        // Give the pool a mature balance: mine 101 blocks to its script.
        backend.mine_to(&server.pool_address().script_pubkey(), 101);

        // A miner with an accrued pending balance.
        let miner = KeyPair::generate();
        let miner_address =
            Address::new(sable_core::address::Network::Mainnet, miner.pubkey_hash());
        {
            let mut ledger = server.ledger().lock();
            let mut shares = HashMap::new();
            shares.insert(miner_address.to_string(), 10u64);
            ledger
                .process_block_reward(5 * COIN, &shares, 0)
                .unwrap();
        }

        let results = server.run_payouts();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.error.is_none(), "payout failed: {:?}", result.error);
        assert_eq!(result.amount, 5 * COIN);

        // Paid in full: pending cleared, mempool holds the payout tx.
        assert!(server.ledger().lock().pending_for(&miner_address.to_string()).is_none());
        assert_eq!(server.ledger().lock().total_paid(), 5 * COIN);
    }

    #[test]
    fn payout_defers_without_mature_balance() {
        let backend = TestBackend::easy();
        let server = test_server(backend.clone());

        let miner = miner_username();
        {
            let mut ledger = server.ledger().lock();
            let mut shares = HashMap::new();
            shares.insert(miner.clone(), 1u64);
            ledger.process_block_reward(5 * COIN, &shares, 0).unwrap();
        }

        // Pool has no UTXOs at all: the cycle is a no-op and the balance
        // stays pending for the next round.
        let results = server.run_payouts();
        assert!(results.is_empty());
        assert_eq!(server.ledger().lock().pending_for(&miner).unwrap().amount, 5 * COIN);
    }
}
