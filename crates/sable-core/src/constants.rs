//! Protocol constants. All monetary values in base units (1 SBL = 10^8).

pub const COIN: u64 = 100_000_000;

pub const INITIAL_REWARD: u64 = 100 * COIN;
pub const HALVING_INTERVAL: u32 = 210_000;
/// Floor below which the subsidy never falls.
pub const MIN_REWARD: u64 = COIN;

pub const BLOCK_TIME_TARGET_SECS: u64 = 120;
/// Accepted blocks may lead wall-clock time by at most this many seconds.
pub const MAX_FUTURE_BLOCK_TIME: u64 = 7_200;
/// Number of trailing blocks whose median timestamp forms the MTP lower bound.
pub const MTP_WINDOW: usize = 11;

/// Confirmations (tip − height + 1) required before a coinbase output spends.
pub const COINBASE_MATURITY: u32 = 100;
pub const MAX_BLOCK_SIZE: usize = 2_000_000;
pub const MAX_TX_SIZE: usize = 100_000;
/// Deepest rollback `try_reorganize` will perform, regardless of work.
pub const MAX_REORG_DEPTH: u32 = 100;

/// Retarget window: the next target is computed from the last this-many blocks.
pub const DGW_WINDOW: u32 = 24;
/// Per-retarget clamp on the actual/expected timespan ratio.
pub const MAX_DIFFICULTY_ADJUSTMENT: u64 = 4;
/// Seconds without a block before template difficulty starts relaxing.
pub const EMERGENCY_THRESHOLD_SECS: u64 = 1_200;
/// Target multiplier applied per elapsed emergency period.
pub const EMERGENCY_EASING_FACTOR: u64 = 4;

/// Compact target of the genesis block.
pub const INITIAL_BITS: u32 = 0x1e0f_ffff;
/// Easiest permitted compact target (upper clamp of the retarget).
pub const EASIEST_BITS: u32 = 0x207f_ffff;
/// Hardest permitted compact target (lower clamp of the retarget).
pub const HARDEST_BITS: u32 = 0x1a00_ffff;

pub const MAX_MEMPOOL_BYTES: usize = 300_000_000;
/// Default mempool entry lifetime. 0 means entries never expire.
pub const DEFAULT_MEMPOOL_TTL_SECS: u64 = 0;

/// Fee-rate bounds in base units per byte.
pub const MIN_FEE_RATE: u64 = 1;
pub const MAX_FEE_RATE: u64 = 1_000;
/// Trailing blocks analysed by the fee estimator.
pub const FEE_ESTIMATION_BLOCKS: u32 = 10;
/// Reference transaction size used when quoting an absolute fee.
pub const TYPICAL_TX_BYTES: u64 = 250;

/// Arbitrary miner data allowed in a coinbase script after the height.
pub const MAX_COINBASE_TAG: usize = 100;

/// Base58Check version byte; yields the `S` address prefix.
pub const ADDRESS_VERSION_MAINNET: u8 = 0x3F;
pub const ADDRESS_VERSION_TESTNET: u8 = 0x7F;

pub const DEFAULT_STRATUM_PORT: u16 = 7261;
/// Share target = network target × this multiplier.
pub const SHARE_MULTIPLIER: u64 = 256;
/// In-flight jobs retained for validating late shares.
pub const JOB_RETENTION: usize = 10;
/// Minimum accrued balance before the pool sends a payout.
pub const MIN_PAYOUT: u64 = COIN;
