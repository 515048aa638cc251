//! Error types for the Sable wallet.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("invalid mnemonic: {0}")] InvalidMnemonic(String),
    #[error("invalid derivation: {0}")] InvalidDerivation(String),
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("no mature UTXOs available")] NoMatureUtxo,
    #[error("no key for pubkey hash {0}")] UnknownKey(String),
    #[error("nothing to send: no recipients")] NoRecipients,
    #[error("signing failed on input {index}: {reason}")] SigningFailed { index: usize, reason: String },
    #[error(transparent)] Core(#[from] sable_core::error::SableError),
}
