//! # sable-pool
//! Stratum mining pool: job production, share validation, worker
//! accounting, proportional payouts, and the line-delimited JSON-RPC
//! server.

pub mod backend;
pub mod config;
pub mod error;
pub mod job;
pub mod payout;
pub mod rpc;
pub mod server;
pub mod share;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use backend::PoolBackend;
pub use config::PoolConfig;
pub use error::{PoolError, ShareError};
pub use job::{JobManager, MiningJob};
pub use payout::{dynamic_fee_bps, PayoutLedger, PendingPayout};
pub use server::PoolServer;
pub use share::{ShareValidator, ValidShare};
pub use worker::{ShareOutcome, Worker, WorkerSet};
