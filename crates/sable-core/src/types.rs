//! Core protocol types: transactions, blocks, UTXOs.
//!
//! All monetary values are in base units (1 SBL = 10^8 base units).
//! Hashes are stored in internal (little-endian) byte order; `Display`
//! and the JSON forms use the reversed display order, Bitcoin-style.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::constants::COINBASE_MATURITY;
use crate::encoding;

/// A 32-byte hash value (SHA-256d of a header or transaction).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Used for coinbase previous outpoints and the
    /// genesis parent.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse from display-order hex (the form produced by `Display`).
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(Self(bytes))
    }

    /// The display-order bytes (reversed internal order).
    pub fn display_bytes(&self) -> [u8; 32] {
        let mut out = self.0;
        out.reverse();
        out
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter serializing byte vectors as hex strings in JSON.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint marking a coinbase input.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
///
/// `script_sig` is `push(sig‖sighash_type) push(pubkey)` once signed; for
/// coinbase inputs it carries the block height and an arbitrary miner tag.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub prev: OutPoint,
    /// Unlocking script.
    #[serde(with = "hex_bytes")]
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    /// The output being spent, attached during wallet assembly so the
    /// signer can reconstruct the sighash. Never serialized.
    #[serde(skip)]
    pub prev_output: Option<TxOutput>,
}

impl PartialEq for TxInput {
    /// Wire equality: the `prev_output` attachment is assembly-time
    /// metadata and never serialized, so it does not participate.
    fn eq(&self, other: &Self) -> bool {
        self.prev == other.prev
            && self.script_sig == other.script_sig
            && self.sequence == other.sequence
    }
}

impl Eq for TxInput {}

impl TxInput {
    /// A bare input spending `prev`, to be signed later.
    pub fn new(prev: OutPoint) -> Self {
        Self {
            prev,
            script_sig: Vec::new(),
            sequence: 0xFFFF_FFFF,
            prev_output: None,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.prev.is_null()
    }
}

/// A transaction output, creating a new UTXO.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Value in base units.
    pub value: u64,
    /// Locking script. Restricted to the canonical P2PKH template.
    #[serde(with = "hex_bytes")]
    pub script_pubkey: Vec<u8>,
}

/// A transaction transferring value between addresses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl Transaction {
    /// Compute the transaction ID: SHA-256d over the canonical wire bytes.
    ///
    /// `script_sig` is part of the serialization, so the txid changes when
    /// the transaction is signed and is stable afterwards.
    pub fn txid(&self) -> Hash256 {
        sha256d(&encoding::serialize_tx(self))
    }

    /// Check if this is a coinbase transaction (single input with null
    /// outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev.is_null()
    }

    /// Serialized size in bytes of the canonical wire form.
    pub fn serialized_size(&self) -> usize {
        encoding::serialize_tx(self).len()
    }

    /// Sum of all output values. `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }
}

/// Block header: the 80-byte proof-of-work puzzle.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    /// Hash of the parent block header.
    pub prev_hash: Hash256,
    /// SHA-256d merkle root over the block's txids.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u32,
    /// Compact difficulty target.
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SERIALIZED_SIZE: usize = 80;

    /// Canonical 80-byte serialization: version ‖ prev_hash ‖ merkle_root
    /// ‖ timestamp ‖ bits ‖ nonce, integers little-endian, hashes in
    /// internal byte order.
    pub fn serialize(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut out = [0u8; Self::SERIALIZED_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// The 76-byte prefix handed to miners: the header minus the nonce.
    pub fn serialize_prefix(&self) -> [u8; 76] {
        let full = self.serialize();
        let mut out = [0u8; 76];
        out.copy_from_slice(&full[..76]);
        out
    }

    /// Block header hash (SHA-256d over the 80 bytes).
    pub fn hash(&self) -> Hash256 {
        sha256d(&self.serialize())
    }
}

/// A complete block: height, header, and transactions.
///
/// The height is not part of the 80-byte header; it travels alongside the
/// block in gossip and is implied by position in the chain file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub height: u32,
    pub header: BlockHeader,
    /// Ordered transactions. The first must be the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// The coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Serialized size of the canonical wire form (header + transactions).
    pub fn serialized_size(&self) -> usize {
        encoding::serialize_block(self).len()
    }
}

/// An entry in the unspent transaction output set.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UtxoEntry {
    pub output: TxOutput,
    /// Height of the block that created this output.
    pub height: u32,
    pub is_coinbase: bool,
}

impl UtxoEntry {
    /// Whether this output may be spent by a transaction included at
    /// `spend_height`.
    ///
    /// Coinbase outputs need [`COINBASE_MATURITY`] confirmations counting
    /// the creating block: `spend_height − height + 1`. Non-coinbase
    /// outputs are always mature.
    pub fn is_mature(&self, spend_height: u32) -> bool {
        !self.is_coinbase || self.confirmations(spend_height) >= COINBASE_MATURITY
    }

    /// Confirmation count as seen from `at_height` (inclusive of the
    /// creating block). Zero if `at_height` precedes creation.
    pub fn confirmations(&self, at_height: u32) -> u32 {
        if at_height < self.height {
            return 0;
        }
        at_height - self.height + 1
    }
}

/// SHA-256d: two rounds of SHA-256.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    Hash256(Sha256::digest(first).into())
}
