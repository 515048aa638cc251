//! # sable-network
//! The gossip contract between Sable nodes.
//!
//! The consensus core depends on exactly two directed channels: inbound
//! delivery (`on_block`, `on_tx`) and fire-and-forget outbound
//! announcement (`announce_block`, `announce_tx`). Peer discovery,
//! framing, and transports live outside the core; this crate defines the
//! message shapes, the trait pair, and an in-process router for
//! single-process deployments and tests.

pub mod local;
pub mod protocol;

pub use local::LocalGossip;
pub use protocol::{Announcer, GossipHandler, GossipMessage};
