//! # sable-wallet
//! HD key derivation (BIP-39/32/44), coin selection, and transaction
//! building for Sable.

pub mod builder;
pub mod coin_selection;
pub mod error;
pub mod keys;
pub mod mnemonic;

pub use builder::{Recipient, TransactionBuilder, UnsignedTransaction};
pub use coin_selection::{select_coins, CoinSelection, WalletUtxo};
pub use error::WalletError;
pub use keys::{ExtendedKey, KeyChain, COIN_TYPE, HARDENED};
