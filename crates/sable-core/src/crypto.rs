//! secp256k1 ECDSA operations and transaction signing.
//!
//! Key generation, sighash construction, DER signing and verification.
//! Uses k256 for the curve, SHA-256d for digests, and
//! RIPEMD-160(SHA-256(pubkey)) (HASH160) for address hashes.
//!
//! # Signing scheme (SIGHASH_ALL only)
//!
//! The sighash for input `i` is SHA-256d over a scratch serialization of
//! the transaction in which every input's script_sig is empty except
//! input `i`, which carries the script_pubkey of the output it spends,
//! followed by the 4-byte little-endian sighash type. The DER signature
//! gets the sighash type appended as one byte, and the final script_sig
//! is `push(sig‖type) push(pubkey)`.

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

use crate::encoding::write_varint;
use crate::error::{CryptoError, TransactionError};
use crate::script;
use crate::types::{sha256d, Hash256, Transaction};

/// The only supported signature hash type.
pub const SIGHASH_ALL: u8 = 1;

/// HASH160: RIPEMD-160 over SHA-256.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// secp256k1 keypair for signing transaction inputs.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a random keypair from the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut secret = Zeroizing::new([0u8; 32]);
        loop {
            rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, secret.as_mut());
            if let Ok(signing_key) = SigningKey::from_slice(secret.as_ref()) {
                return Self { signing_key };
            }
            // Rejected scalar (zero or ≥ group order); redraw.
        }
    }

    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// The raw secret key bytes. Handle with care.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes().into())
    }

    /// Compressed SEC1 public key (33 bytes).
    pub fn public_key(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// HASH160 of the compressed public key.
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.public_key())
    }

    /// Sign a 32-byte digest, returning the DER-encoded signature.
    pub fn sign_digest(&self, digest: &Hash256) -> Result<Vec<u8>, CryptoError> {
        let sig: Signature = self
            .signing_key
            .sign_prehash(digest.as_bytes())
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(sig.to_der().as_bytes().to_vec())
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Verify a DER signature over a digest against a SEC1 public key.
pub fn verify_digest(
    pubkey: &[u8],
    digest: &Hash256,
    der_signature: &[u8],
) -> Result<(), CryptoError> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(pubkey).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature =
        Signature::from_der(der_signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify_prehash(digest.as_bytes(), &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Compute the sighash for `tx.inputs[index]` spending an output locked
/// by `prev_script`.
///
/// Builds the scratch serialization (all other inputs' scripts empty),
/// appends the 4-byte sighash type, and hashes with SHA-256d.
pub fn sighash(
    tx: &Transaction,
    index: usize,
    prev_script: &[u8],
    sighash_type: u8,
) -> Result<Hash256, CryptoError> {
    if index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index,
            len: tx.inputs.len(),
        });
    }

    let mut data = Vec::with_capacity(128 + prev_script.len());
    data.extend_from_slice(&tx.version.to_le_bytes());

    write_varint(&mut data, tx.inputs.len() as u64);
    for (i, input) in tx.inputs.iter().enumerate() {
        data.extend_from_slice(input.prev.txid.as_bytes());
        data.extend_from_slice(&input.prev.index.to_le_bytes());
        if i == index {
            write_varint(&mut data, prev_script.len() as u64);
            data.extend_from_slice(prev_script);
        } else {
            data.push(0);
        }
        data.extend_from_slice(&input.sequence.to_le_bytes());
    }

    write_varint(&mut data, tx.outputs.len() as u64);
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        write_varint(&mut data, output.script_pubkey.len() as u64);
        data.extend_from_slice(&output.script_pubkey);
    }

    data.extend_from_slice(&tx.locktime.to_le_bytes());
    data.extend_from_slice(&u32::from(sighash_type).to_le_bytes());

    Ok(sha256d(&data))
}

/// Sign `tx.inputs[index]` with `keypair`, writing the final script_sig.
///
/// The input must have its `prev_output` attached (done during wallet
/// assembly); its script_pubkey is committed to by the sighash.
pub fn sign_input(
    tx: &mut Transaction,
    index: usize,
    keypair: &KeyPair,
) -> Result<(), TransactionError> {
    let prev_script = tx
        .inputs
        .get(index)
        .and_then(|input| input.prev_output.as_ref())
        .map(|out| out.script_pubkey.clone())
        .ok_or(TransactionError::PrevOutputNotAttached(index))?;

    let digest = sighash(tx, index, &prev_script, SIGHASH_ALL)
        .map_err(|_| TransactionError::SigInvalid { index })?;
    let mut signature = keypair
        .sign_digest(&digest)
        .map_err(|_| TransactionError::SigInvalid { index })?;
    signature.push(SIGHASH_ALL);

    tx.inputs[index].script_sig = script::script_sig(&signature, &keypair.public_key());
    Ok(())
}

/// Verify that `tx.inputs[index]` validly spends an output locked by
/// `prev_script_pubkey`.
///
/// Parses the script_sig, checks the embedded pubkey hashes to the
/// script's HASH160, reconstructs the sighash and verifies the DER
/// signature.
pub fn verify_input(
    tx: &Transaction,
    index: usize,
    prev_script_pubkey: &[u8],
) -> Result<(), TransactionError> {
    let input = tx
        .inputs
        .get(index)
        .ok_or(TransactionError::SigInvalid { index })?;
    let (sig_with_type, pubkey) = script::parse_script_sig(&input.script_sig)?;

    let (der_sig, type_byte) = sig_with_type
        .split_last()
        .map(|(last, rest)| (rest, *last))
        .ok_or_else(|| TransactionError::MalformedScript("empty signature".into()))?;

    let expected_hash = script::extract_pubkey_hash(prev_script_pubkey)
        .ok_or_else(|| TransactionError::MalformedScript("prev script is not P2PKH".into()))?;
    if hash160(pubkey) != expected_hash {
        return Err(TransactionError::SigInvalid { index });
    }

    let digest = sighash(tx, index, prev_script_pubkey, type_byte)
        .map_err(|_| TransactionError::SigInvalid { index })?;
    verify_digest(pubkey, &digest, der_sig)
        .map_err(|_| TransactionError::SigInvalid { index })?;
    Ok(())
}
