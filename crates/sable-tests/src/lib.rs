//! Cross-crate test helpers for the Sable workspace.

pub mod helpers;
