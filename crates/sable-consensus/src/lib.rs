//! # sable-consensus
//! Block acceptance, template production, and chain-work
//! reorganization for Sable.

pub mod engine;

pub use engine::{AcceptedBlock, BlockTemplate, ConsensusEngine};
