//! File persistence for the chain and mempool.
//!
//! The chain file is binary: magic ‖ format version ‖ varint(count) ‖
//! the canonical wire bytes of every block in height order (heights are
//! positional, genesis first). The mempool file is JSON: each entry's
//! canonical transaction hex plus its admission timestamp, and the TTL
//! in effect when it was written. Both files are written
//! temp-then-rename so a crash never leaves a torn file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sable_core::chain::ChainStore;
use sable_core::encoding::{self, Reader};
use sable_core::error::{CodecError, SableError};
use sable_core::mempool::Mempool;
use sable_core::types::{Block, Transaction};

const CHAIN_MAGIC: [u8; 4] = *b"SBLC";
const CHAIN_FORMAT_VERSION: u32 = 1;

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Serialize the whole chain to `path`.
pub fn save_chain(path: &Path, store: &ChainStore) -> Result<(), SableError> {
    let blocks = store.blocks_from(0);
    let mut out = Vec::with_capacity(blocks.len() * 512 + 16);
    out.extend_from_slice(&CHAIN_MAGIC);
    out.extend_from_slice(&CHAIN_FORMAT_VERSION.to_le_bytes());
    encoding::write_varint(&mut out, blocks.len() as u64);
    for block in blocks {
        out.extend_from_slice(&encoding::serialize_block(block));
    }
    write_atomically(path, &out)?;
    info!(blocks = blocks.len(), path = %path.display(), "chain saved");
    Ok(())
}

/// Read a chain file back into height-ordered blocks. `Ok(None)` when
/// the file does not exist.
pub fn load_chain(path: &Path) -> Result<Option<Vec<Block>>, SableError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    let mut reader = Reader::new(&bytes);

    let magic = [
        reader.read_u8().map_err(SableError::Codec)?,
        reader.read_u8().map_err(SableError::Codec)?,
        reader.read_u8().map_err(SableError::Codec)?,
        reader.read_u8().map_err(SableError::Codec)?,
    ];
    if magic != CHAIN_MAGIC {
        return Err(SableError::Persist("chain file magic mismatch".into()));
    }
    let version = reader.read_u32().map_err(SableError::Codec)?;
    if version != CHAIN_FORMAT_VERSION {
        return Err(SableError::Persist(format!(
            "unsupported chain file version {version}"
        )));
    }

    let count = reader.read_varint().map_err(SableError::Codec)?;
    let mut blocks = Vec::with_capacity(count.min(1 << 20) as usize);
    for height in 0..count {
        let block = encoding::read_block(&mut reader, height as u32).map_err(SableError::Codec)?;
        blocks.push(block);
    }
    if !reader.is_empty() {
        return Err(SableError::Codec(CodecError::TrailingBytes(reader.remaining())));
    }
    Ok(Some(blocks))
}

#[derive(Serialize, Deserialize)]
struct MempoolFileEntry {
    tx: String,
    admitted_at: u64,
}

#[derive(Serialize, Deserialize)]
struct MempoolFile {
    ttl_secs: u64,
    entries: Vec<MempoolFileEntry>,
}

/// Persist the mempool (canonical tx hex + admission timestamps + TTL).
pub fn save_mempool(path: &Path, mempool: &Mempool) -> Result<(), SableError> {
    let file = MempoolFile {
        ttl_secs: mempool.ttl_secs(),
        entries: mempool
            .iter()
            .map(|entry| MempoolFileEntry {
                tx: hex::encode(encoding::serialize_tx(&entry.tx)),
                admitted_at: entry.admitted_at,
            })
            .collect(),
    };
    let json = serde_json::to_string(&file).map_err(|e| SableError::Persist(e.to_string()))?;
    write_atomically(path, json.as_bytes())?;
    Ok(())
}

/// Load persisted mempool entries as `(tx, admitted_at)` pairs plus the
/// saved TTL. Undecodable entries are skipped with a warning rather than
/// poisoning the whole pool.
pub fn load_mempool(path: &Path) -> Result<Option<(u64, Vec<(Transaction, u64)>)>, SableError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let file: MempoolFile =
        serde_json::from_str(&data).map_err(|e| SableError::Persist(e.to_string()))?;

    let mut entries = Vec::with_capacity(file.entries.len());
    for entry in file.entries {
        let decoded = hex::decode(&entry.tx)
            .ok()
            .and_then(|bytes| encoding::deserialize_tx(&bytes).ok());
        match decoded {
            Some(tx) => entries.push((tx, entry.admitted_at)),
            None => warn!("skipping undecodable mempool entry"),
        }
    }
    Ok(Some((file.ttl_secs, entries)))
}
