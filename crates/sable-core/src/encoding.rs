//! Canonical wire codec for transactions and blocks.
//!
//! Bitcoin-style layout: little-endian integers, CompactSize varints,
//! hashes in internal byte order. This serialization defines txids and
//! block bytes, so it is consensus-critical; every field is written and
//! read in a single fixed order with no optional parts.

use crate::error::CodecError;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Hard cap on any decoded length prefix (scripts, tx counts). Larger
/// prefixes are rejected before any allocation.
const MAX_DECODE_LEN: u64 = 4_000_000;

/// Encode a CompactSize varint.
pub fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xFC => out.push(n as u8),
        0xFD..=0xFFFF => {
            out.push(0xFD);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.push(0xFE);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xFF);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Sequential reader over a byte slice, tracking its position for error
/// reporting.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    pub fn read_hash(&mut self) -> Result<Hash256, CodecError> {
        let bytes = self.take(32)?;
        Ok(Hash256(bytes.try_into().expect("32-byte slice")))
    }

    /// Decode a CompactSize varint, rejecting non-minimal encodings.
    pub fn read_varint(&mut self) -> Result<u64, CodecError> {
        let tag = self.read_u8()?;
        let value = match tag {
            0xFD => {
                let v = u16::from_le_bytes(self.take(2)?.try_into().expect("2-byte slice")) as u64;
                if v < 0xFD {
                    return Err(CodecError::NonMinimalVarint);
                }
                v
            }
            0xFE => {
                let v = u32::from_le_bytes(self.take(4)?.try_into().expect("4-byte slice")) as u64;
                if v <= 0xFFFF {
                    return Err(CodecError::NonMinimalVarint);
                }
                v
            }
            0xFF => {
                let v = u64::from_le_bytes(self.take(8)?.try_into().expect("8-byte slice"));
                if v <= 0xFFFF_FFFF {
                    return Err(CodecError::NonMinimalVarint);
                }
                v
            }
            n => n as u64,
        };
        Ok(value)
    }

    /// Read a varint length prefix followed by that many bytes.
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_varint()?;
        if len > MAX_DECODE_LEN {
            return Err(CodecError::LengthOverflow(len));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    /// A bounded count prefix (tx counts, input/output counts).
    fn read_count(&mut self) -> Result<usize, CodecError> {
        let n = self.read_varint()?;
        if n > MAX_DECODE_LEN {
            return Err(CodecError::LengthOverflow(n));
        }
        Ok(n as usize)
    }
}

fn write_input(out: &mut Vec<u8>, input: &TxInput) {
    out.extend_from_slice(input.prev.txid.as_bytes());
    out.extend_from_slice(&input.prev.index.to_le_bytes());
    write_varint(out, input.script_sig.len() as u64);
    out.extend_from_slice(&input.script_sig);
    out.extend_from_slice(&input.sequence.to_le_bytes());
}

fn write_output(out: &mut Vec<u8>, output: &TxOutput) {
    out.extend_from_slice(&output.value.to_le_bytes());
    write_varint(out, output.script_pubkey.len() as u64);
    out.extend_from_slice(&output.script_pubkey);
}

/// Canonical transaction bytes:
/// version ‖ varint(|in|) ‖ inputs ‖ varint(|out|) ‖ outputs ‖ locktime.
pub fn serialize_tx(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + tx.inputs.len() * 180 + tx.outputs.len() * 34);
    out.extend_from_slice(&tx.version.to_le_bytes());
    write_varint(&mut out, tx.inputs.len() as u64);
    for input in &tx.inputs {
        write_input(&mut out, input);
    }
    write_varint(&mut out, tx.outputs.len() as u64);
    for output in &tx.outputs {
        write_output(&mut out, output);
    }
    out.extend_from_slice(&tx.locktime.to_le_bytes());
    out
}

fn read_input(r: &mut Reader<'_>) -> Result<TxInput, CodecError> {
    let txid = r.read_hash()?;
    let index = r.read_u32()?;
    let script_sig = r.read_var_bytes()?;
    let sequence = r.read_u32()?;
    Ok(TxInput {
        prev: OutPoint { txid, index },
        script_sig,
        sequence,
        prev_output: None,
    })
}

fn read_output(r: &mut Reader<'_>) -> Result<TxOutput, CodecError> {
    let value = r.read_u64()?;
    let script_pubkey = r.read_var_bytes()?;
    Ok(TxOutput { value, script_pubkey })
}

/// Decode a transaction from a reader positioned at its first byte.
pub fn read_tx(r: &mut Reader<'_>) -> Result<Transaction, CodecError> {
    let version = r.read_u32()?;
    let n_inputs = r.read_count()?;
    let mut inputs = Vec::with_capacity(n_inputs);
    for _ in 0..n_inputs {
        inputs.push(read_input(r)?);
    }
    let n_outputs = r.read_count()?;
    let mut outputs = Vec::with_capacity(n_outputs);
    for _ in 0..n_outputs {
        outputs.push(read_output(r)?);
    }
    let locktime = r.read_u32()?;
    Ok(Transaction {
        version,
        inputs,
        outputs,
        locktime,
    })
}

/// Decode a transaction from exactly `bytes`.
pub fn deserialize_tx(bytes: &[u8]) -> Result<Transaction, CodecError> {
    let mut r = Reader::new(bytes);
    let tx = read_tx(&mut r)?;
    if !r.is_empty() {
        return Err(CodecError::TrailingBytes(r.remaining()));
    }
    Ok(tx)
}

/// Decode an 80-byte header from a reader.
pub fn read_header(r: &mut Reader<'_>) -> Result<BlockHeader, CodecError> {
    let version = r.read_u32()?;
    let prev_hash = r.read_hash()?;
    let merkle_root = r.read_hash()?;
    let timestamp = r.read_u32()?;
    let bits = r.read_u32()?;
    let nonce = r.read_u32()?;
    Ok(BlockHeader {
        version,
        prev_hash,
        merkle_root,
        timestamp,
        bits,
        nonce,
    })
}

/// Canonical block bytes: 80-byte header ‖ varint(|txs|) ‖ transactions.
///
/// The height is not on the wire; it is implied by position in the chain
/// file and carried explicitly in gossip messages.
pub fn serialize_block(block: &Block) -> Vec<u8> {
    let mut out = Vec::with_capacity(BlockHeader::SERIALIZED_SIZE + 8);
    out.extend_from_slice(&block.header.serialize());
    write_varint(&mut out, block.transactions.len() as u64);
    for tx in &block.transactions {
        out.extend_from_slice(&serialize_tx(tx));
    }
    out
}

/// Decode a block from a reader, assigning the caller-supplied height.
pub fn read_block(r: &mut Reader<'_>, height: u32) -> Result<Block, CodecError> {
    let header = read_header(r)?;
    let n_txs = r.read_count()?;
    let mut transactions = Vec::with_capacity(n_txs);
    for _ in 0..n_txs {
        transactions.push(read_tx(r)?);
    }
    Ok(Block {
        height,
        header,
        transactions,
    })
}

/// Decode a block from exactly `bytes`.
pub fn deserialize_block(bytes: &[u8], height: u32) -> Result<Block, CodecError> {
    let mut r = Reader::new(bytes);
    let block = read_block(&mut r, height)?;
    if !r.is_empty() {
        return Err(CodecError::TrailingBytes(r.remaining()));
    }
    Ok(block)
}
