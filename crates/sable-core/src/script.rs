//! The canonical P2PKH script template.
//!
//! Sable supports a single locking script:
//! `OP_DUP OP_HASH160 <20-byte HASH160> OP_EQUALVERIFY OP_CHECKSIG`.
//! There is no script interpreter; outputs either match the template or
//! are unspendable by consensus.

use crate::error::TransactionError;

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xA9;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xAC;

/// Serialized length of the P2PKH template.
pub const P2PKH_SCRIPT_LEN: usize = 25;

/// Build the P2PKH locking script for a 20-byte pubkey hash.
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(P2PKH_SCRIPT_LEN);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Extract the pubkey hash from a P2PKH script, or `None` if the script
/// does not match the template exactly.
pub fn extract_pubkey_hash(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() != P2PKH_SCRIPT_LEN {
        return None;
    }
    if script[0] != OP_DUP
        || script[1] != OP_HASH160
        || script[2] != 20
        || script[23] != OP_EQUALVERIFY
        || script[24] != OP_CHECKSIG
    {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&script[3..23]);
    Some(hash)
}

/// Build an unlocking script: `push(sig‖sighash_type) push(pubkey)`.
///
/// Both pushes use single-byte lengths; a DER signature plus type byte is
/// at most 73 bytes and a compressed pubkey is 33.
pub fn script_sig(signature_with_type: &[u8], pubkey: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + signature_with_type.len() + pubkey.len());
    script.push(signature_with_type.len() as u8);
    script.extend_from_slice(signature_with_type);
    script.push(pubkey.len() as u8);
    script.extend_from_slice(pubkey);
    script
}

/// Parse an unlocking script back into `(sig‖sighash_type, pubkey)`.
pub fn parse_script_sig(script: &[u8]) -> Result<(&[u8], &[u8]), TransactionError> {
    let err = |msg: &str| TransactionError::MalformedScript(msg.to_string());

    if script.len() < 2 {
        return Err(err("script_sig too short"));
    }
    let sig_len = script[0] as usize;
    if script.len() < 1 + sig_len + 1 {
        return Err(err("signature push overruns script"));
    }
    let sig = &script[1..1 + sig_len];
    if sig.is_empty() {
        return Err(err("empty signature push"));
    }

    let pubkey_len = script[1 + sig_len] as usize;
    let pubkey_start = 2 + sig_len;
    if script.len() != pubkey_start + pubkey_len {
        return Err(err("pubkey push length mismatch"));
    }
    let pubkey = &script[pubkey_start..];
    Ok((sig, pubkey))
}
