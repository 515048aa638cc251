//! Base58Check address encoding.
//!
//! An address is `Base58Check(version ‖ HASH160(pubkey))`. The mainnet
//! version byte `0x3F` yields the `S` prefix; testnet uses `0x7F`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{ADDRESS_VERSION_MAINNET, ADDRESS_VERSION_TESTNET};
use crate::crypto::hash160;
use crate::error::AddressError;
use crate::script;

/// Network identifier determining the address version byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn version_byte(&self) -> u8 {
        match self {
            Network::Mainnet => ADDRESS_VERSION_MAINNET,
            Network::Testnet => ADDRESS_VERSION_TESTNET,
        }
    }

    pub fn from_version_byte(version: u8) -> Result<Self, AddressError> {
        match version {
            ADDRESS_VERSION_MAINNET => Ok(Network::Mainnet),
            ADDRESS_VERSION_TESTNET => Ok(Network::Testnet),
            other => Err(AddressError::UnknownVersion(other)),
        }
    }
}

/// A Sable address: a 20-byte pubkey hash plus network version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    pubkey_hash: [u8; 20],
}

impl Address {
    pub fn new(network: Network, pubkey_hash: [u8; 20]) -> Self {
        Self {
            network,
            pubkey_hash,
        }
    }

    /// Derive the address of a SEC1 public key.
    pub fn from_pubkey(network: Network, pubkey: &[u8]) -> Self {
        Self::new(network, hash160(pubkey))
    }

    /// Recover the address committed to by a P2PKH locking script.
    pub fn from_script(network: Network, script_pubkey: &[u8]) -> Option<Self> {
        script::extract_pubkey_hash(script_pubkey).map(|hash| Self::new(network, hash))
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.pubkey_hash
    }

    /// The P2PKH locking script paying this address.
    pub fn script_pubkey(&self) -> Vec<u8> {
        script::p2pkh_script(&self.pubkey_hash)
    }

    /// Decode from the Base58Check string form.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| match e {
                bs58::decode::Error::InvalidChecksum { .. } => AddressError::InvalidChecksum,
                _ => AddressError::InvalidBase58,
            })?;
        if payload.len() != 21 {
            return Err(AddressError::InvalidLength(payload.len()));
        }
        let network = Network::from_version_byte(payload[0])?;
        let mut pubkey_hash = [0u8; 20];
        pubkey_hash.copy_from_slice(&payload[1..]);
        Ok(Self {
            network,
            pubkey_hash,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = [0u8; 21];
        payload[0] = self.network.version_byte();
        payload[1..].copy_from_slice(&self.pubkey_hash);
        write!(f, "{}", bs58::encode(&payload).with_check().into_string())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}
