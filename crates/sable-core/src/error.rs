//! Error types for the Sable protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("missing previous output: {0}")] MissingPrevOut(String),
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("invalid signature on input {index}")] SigInvalid { index: usize },
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("oversized: {size} > {max}")] Oversized { size: usize, max: usize },
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("value overflow")] ValueOverflow,
    #[error("invalid coinbase: {0}")] InvalidCoinbase(String),
    #[error("immature coinbase spent by input {index}: {confirmations} of {required} confirmations")]
    ImmatureCoinbase { index: usize, confirmations: u32, required: u32 },
    #[error("outputs exceed inputs: {outputs} > {inputs}")] InputsLessThanOutputs { inputs: u64, outputs: u64 },
    #[error("null outpoint in non-coinbase input {0}")] NullOutpoint(usize),
    #[error("malformed script: {0}")] MalformedScript(String),
    #[error("prev_output not attached to input {0}")] PrevOutputNotAttached(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid height: expected {expected}, got {got}")] InvalidHeight { expected: u32, got: u32 },
    #[error("bad parent: expected {expected}, got {got}")] BadParent { expected: String, got: String },
    #[error("timestamp {timestamp} not after median time past {mtp}")] TimestampBeforeMtp { timestamp: u32, mtp: u32 },
    #[error("timestamp {timestamp} too far in the future (limit {limit})")] TimestampTooFar { timestamp: u32, limit: u32 },
    #[error("bad proof of work")] BadPoW,
    #[error("bad compact target encoding: {0:#010x}")] BadBits(u32),
    #[error("bad merkle root")] BadMerkle,
    #[error("bad coinbase position: {0}")] BadCoinbasePosition(String),
    #[error("double spend of {0}")] DoubleSpend(String),
    #[error("duplicate txid: {0}")] DuplicateTxid(String),
    #[error("coinbase overpays: got {got}, allowed {allowed}")] CoinbaseOverpay { got: u64, allowed: u64 },
    #[error("oversized block: {size} > {max}")] Oversized { size: usize, max: usize },
    #[error("tx {index}: {source}")] Transaction { index: usize, source: TransactionError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("empty chain")] EmptyChain,
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u32, got: u32 },
    #[error("duplicate block: {0}")] DuplicateBlock(String),
    #[error("undo data missing for block {0}")] UndoDataMissing(String),
    #[error("missing UTXO during connect: {0}")] MissingUtxo(String),
    #[error("reorg too deep: {depth} > {max}")] ReorgTooDeep { depth: u32, max: u32 },
    #[error("reorg gains no work")] ReorgNoGain,
    #[error("bad fork: {0}")] BadFork(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] Duplicate(String),
    #[error("coinbase transactions are not relayed")] CoinbaseShape,
    #[error("pool byte limit reached")] PoolFull,
    #[error("double spend of {outpoint} (claimed by {existing_txid})")] DoubleSpend { outpoint: String, existing_txid: String },
    #[error(transparent)] Transaction(#[from] TransactionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid secret key bytes")] InvalidSecretKey,
    #[error("invalid signature encoding")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("base58 decode failed")] InvalidBase58,
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid payload length: {0}")] InvalidLength(usize),
    #[error("unknown version byte: {0:#04x}")] UnknownVersion(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input at byte {0}")] UnexpectedEof(usize),
    #[error("non-minimal varint")] NonMinimalVarint,
    #[error("trailing bytes after decode: {0}")] TrailingBytes(usize),
    #[error("length prefix {0} exceeds limit")] LengthOverflow(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("empty chain; no fee history")] NoHistory,
}

#[derive(Error, Debug)]
pub enum SableError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Codec(#[from] CodecError),
    #[error("persist: {0}")] Persist(String),
}

impl From<std::io::Error> for SableError {
    fn from(e: std::io::Error) -> Self {
        SableError::Persist(e.to_string())
    }
}
