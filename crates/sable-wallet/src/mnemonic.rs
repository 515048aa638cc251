//! BIP-39 mnemonic backup and restoration.

use bip39::{Language, Mnemonic};

use crate::error::WalletError;

/// Generate a fresh 24-word mnemonic from OS entropy.
pub fn generate_mnemonic() -> String {
    use rand::RngCore;
    let mut entropy = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    Mnemonic::from_entropy_in(Language::English, &entropy)
        .expect("32 bytes always produces a valid mnemonic")
        .to_string()
}

/// Derive the 64-byte BIP-39 seed from a phrase and optional passphrase.
///
/// Normalizes whitespace and case before parsing; accepts 12 or 24 words.
pub fn phrase_to_seed(phrase: &str, passphrase: &str) -> Result<[u8; 64], WalletError> {
    let normalized = phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let m = Mnemonic::parse_in(Language::English, &normalized)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(m.to_seed(passphrase))
}
