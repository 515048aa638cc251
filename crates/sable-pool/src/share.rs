//! Share validation.
//!
//! A submission names a job, an extranonce2, and a nonce. Validation
//! order: parse the nonce, find the job (missing → stale), reject
//! duplicates of (extranonce2, nonce) within the job, hash the 80-byte
//! header, and compare the display-order integer against the share
//! target. A hash that also beats the network target is a block
//! candidate. The dedup set for a job is dropped when the job retires.

use std::collections::{HashMap, HashSet};

use primitive_types::U256;
use tracing::debug;

use sable_core::compact::hash_to_u256;
use sable_core::types::{sha256d, Hash256};

use crate::error::ShareError;
use crate::job::MiningJob;

/// A share that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidShare {
    pub nonce: u32,
    /// Header hash of the share.
    pub hash: Hash256,
    /// The hash also beats the network target: submit it as a block.
    pub is_block_candidate: bool,
}

/// Validates shares and tracks per-job duplicates.
pub struct ShareValidator {
    /// job id → set of (extranonce2, nonce) already counted.
    seen: HashMap<String, HashSet<(String, u32)>>,
}

impl ShareValidator {
    pub fn new() -> Self {
        Self {
            seen: HashMap::new(),
        }
    }

    /// Validate one submission against its job.
    ///
    /// `hash_hint` is a miner-reported hash, logged for diagnostics but
    /// never trusted; the pool always recomputes.
    pub fn validate(
        &mut self,
        job: &MiningJob,
        extranonce2: &str,
        nonce_hex: &str,
        hash_hint: Option<&str>,
    ) -> Result<ValidShare, ShareError> {
        let nonce = parse_nonce(nonce_hex).ok_or(ShareError::BadNonce)?;

        let dedup = self.seen.entry(job.id.clone()).or_default();
        if !dedup.insert((extranonce2.to_string(), nonce)) {
            return Err(ShareError::DuplicateShare);
        }

        let mut header = [0u8; 80];
        header[..76].copy_from_slice(&job.header_prefix);
        header[76..].copy_from_slice(&nonce.to_le_bytes());
        let hash = sha256d(&header);
        let value: U256 = hash_to_u256(&hash);

        if let Some(hint) = hash_hint {
            if hint != hash.to_string() {
                debug!(job = %job.id, %hash, hint, "miner hash hint mismatch");
            }
        }

        if value >= job.share_target {
            return Err(ShareError::LowDifficulty);
        }

        Ok(ValidShare {
            nonce,
            hash,
            is_block_candidate: value < job.network_target,
        })
    }

    /// Forget dedup state for jobs that are no longer retained.
    pub fn retain_jobs(&mut self, live_ids: &[String]) {
        let live: HashSet<&String> = live_ids.iter().collect();
        self.seen.retain(|id, _| live.contains(id));
    }

    /// Number of jobs with dedup state (test/diagnostic surface).
    pub fn tracked_jobs(&self) -> usize {
        self.seen.len()
    }
}

impl Default for ShareValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a hex nonce, tolerating an `0x` prefix.
fn parse_nonce(s: &str) -> Option<u32> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    if trimmed.is_empty() || trimmed.len() > 8 {
        return None;
    }
    u32::from_str_radix(trimmed, 16).ok()
}
