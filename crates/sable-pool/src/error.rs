//! Error types for the Stratum pool.
use thiserror::Error;

/// Share rejection reasons, reported verbatim over Stratum.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShareError {
    #[error("bad nonce")] BadNonce,
    #[error("stale job")] StaleJob,
    #[error("duplicate share")] DuplicateShare,
    #[error("low difficulty")] LowDifficulty,
}

impl ShareError {
    /// JSON-RPC error code for `mining.submit` rejections.
    pub fn code(&self) -> i32 {
        match self {
            ShareError::BadNonce => 20,
            ShareError::StaleJob => 21,
            ShareError::DuplicateShare => 22,
            ShareError::LowDifficulty => 23,
        }
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker not authorized")] NotAuthorized,
    #[error("invalid address: {0}")] InvalidAddress(String),
    #[error("invalid params: {0}")] InvalidParams(String),
    #[error(transparent)] Share(#[from] ShareError),
    #[error("no current job")] NoJob,
    #[error("insufficient funds for payout: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("no mature UTXOs")] NoMatureUtxo,
    #[error("block rejected: {0}")] BlockRejected(String),
    #[error("persist: {0}")] Persist(String),
    #[error("signing: {0}")] Signing(String),
}
