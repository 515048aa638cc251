//! BIP-32 hierarchical deterministic key derivation on secp256k1.
//!
//! Extended keys are derived with HMAC-SHA512 per BIP-32; the account
//! layout follows BIP-44: `m/44'/5353'/account'/change/index`. Secret
//! material is zeroized on drop.

use hmac::{Hmac, Mac};
use k256::elliptic_curve::{Field, PrimeField};
use sha2::Sha512;
use std::collections::HashMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use sable_core::address::{Address, Network};
use sable_core::crypto::KeyPair;

use crate::error::WalletError;

type HmacSha512 = Hmac<Sha512>;

/// BIP-44 coin type registered for Sable.
pub const COIN_TYPE: u32 = 5353;

/// Hardened-derivation index offset.
pub const HARDENED: u32 = 0x8000_0000;

/// HMAC key for the BIP-32 master node.
const MASTER_HMAC_KEY: &[u8] = b"Bitcoin seed";

/// An extended private key: secret scalar plus chain code.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ExtendedKey {
    secret: [u8; 32],
    chain_code: [u8; 32],
    depth: u8,
}

impl fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKey")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl ExtendedKey {
    /// The BIP-32 master node from a 64-byte BIP-39 seed.
    pub fn master(seed: &[u8; 64]) -> Result<Self, WalletError> {
        let mut mac = HmacSha512::new_from_slice(MASTER_HMAC_KEY)
            .expect("HMAC accepts any key length");
        mac.update(seed);
        let digest = mac.finalize().into_bytes();

        let mut secret = [0u8; 32];
        let mut chain_code = [0u8; 32];
        secret.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);

        // The master secret must be a valid non-zero scalar.
        scalar_from_bytes(&secret)
            .ok_or_else(|| WalletError::InvalidDerivation("master key out of range".into()))?;
        Ok(Self {
            secret,
            chain_code,
            depth: 0,
        })
    }

    /// Derive one child. Indexes ≥ [`HARDENED`] derive hardened children.
    pub fn derive_child(&self, index: u32) -> Result<Self, WalletError> {
        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .expect("HMAC accepts any key length");
        if index >= HARDENED {
            mac.update(&[0u8]);
            mac.update(&self.secret);
        } else {
            let keypair = KeyPair::from_secret_bytes(&self.secret)
                .map_err(|_| WalletError::InvalidDerivation("invalid parent secret".into()))?;
            mac.update(&keypair.public_key());
        }
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let mut il = [0u8; 32];
        let mut chain_code = [0u8; 32];
        il.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);

        // child = (IL + parent) mod n. IL ≥ n or a zero child are
        // rejected per BIP-32; with 2^-127 probability a caller would
        // skip to the next index, but surfacing the error is simpler.
        let il_scalar = scalar_from_bytes(&il)
            .ok_or_else(|| WalletError::InvalidDerivation(format!("index {index} unusable")))?;
        let parent_scalar = scalar_from_bytes(&self.secret)
            .ok_or_else(|| WalletError::InvalidDerivation("invalid parent secret".into()))?;
        let child = il_scalar + parent_scalar;
        if bool::from(child.is_zero()) {
            return Err(WalletError::InvalidDerivation(format!("index {index} unusable")));
        }

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&child.to_repr());
        il.zeroize();
        Ok(Self {
            secret,
            chain_code,
            depth: self.depth + 1,
        })
    }

    /// Derive a full path of child indexes.
    pub fn derive_path(&self, path: &[u32]) -> Result<Self, WalletError> {
        let mut key = Self {
            secret: self.secret,
            chain_code: self.chain_code,
            depth: self.depth,
        };
        for &index in path {
            key = key.derive_child(index)?;
        }
        Ok(key)
    }

    /// The signing keypair at this node.
    pub fn keypair(&self) -> Result<KeyPair, WalletError> {
        KeyPair::from_secret_bytes(&self.secret)
            .map_err(|_| WalletError::InvalidDerivation("secret out of range".into()))
    }
}

fn scalar_from_bytes(bytes: &[u8; 32]) -> Option<k256::Scalar> {
    let scalar = Option::<k256::Scalar>::from(k256::Scalar::from_repr((*bytes).into()))?;
    if bool::from(scalar.is_zero()) {
        None
    } else {
        Some(scalar)
    }
}

/// A BIP-44 account keychain: sequential external (receive) keys under
/// `m/44'/5353'/account'/0/index`, with a reverse pubkey-hash index for
/// signing lookups.
pub struct KeyChain {
    account: ExtendedKey,
    network: Network,
    next_index: u32,
    keypairs: HashMap<u32, KeyPair>,
    by_pubkey_hash: HashMap<[u8; 20], u32>,
}

impl KeyChain {
    /// Build the keychain for `account` from a BIP-39 seed.
    pub fn from_seed(seed: &[u8; 64], account: u32, network: Network) -> Result<Self, WalletError> {
        let master = ExtendedKey::master(seed)?;
        let account_key = master.derive_path(&[
            44 | HARDENED,
            COIN_TYPE | HARDENED,
            account | HARDENED,
        ])?;
        Ok(Self {
            account: account_key,
            network,
            next_index: 0,
            keypairs: HashMap::new(),
            by_pubkey_hash: HashMap::new(),
        })
    }

    /// Derive (or fetch) the external keypair at `index`.
    pub fn keypair_at(&mut self, index: u32) -> Result<&KeyPair, WalletError> {
        if !self.keypairs.contains_key(&index) {
            let key = self.account.derive_path(&[0, index])?;
            let keypair = key.keypair()?;
            self.by_pubkey_hash.insert(keypair.pubkey_hash(), index);
            self.keypairs.insert(index, keypair);
            self.next_index = self.next_index.max(index + 1);
        }
        Ok(&self.keypairs[&index])
    }

    /// Derive the next unused receive address.
    pub fn next_address(&mut self) -> Result<Address, WalletError> {
        let index = self.next_index;
        let network = self.network;
        let keypair = self.keypair_at(index)?;
        Ok(Address::new(network, keypair.pubkey_hash()))
    }

    /// Address at a known index.
    pub fn address_at(&mut self, index: u32) -> Result<Address, WalletError> {
        let network = self.network;
        let keypair = self.keypair_at(index)?;
        Ok(Address::new(network, keypair.pubkey_hash()))
    }

    /// Find the signing key for a pubkey hash (derived so far).
    pub fn key_for_pubkey_hash(&self, pubkey_hash: &[u8; 20]) -> Option<&KeyPair> {
        self.by_pubkey_hash
            .get(pubkey_hash)
            .and_then(|index| self.keypairs.get(index))
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Number of derived keys.
    pub fn derived_count(&self) -> usize {
        self.keypairs.len()
    }
}
