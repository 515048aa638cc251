//! SHA-256d Merkle tree over transaction IDs.
//!
//! Leaves are txids in internal byte order; an inner node is
//! `SHA-256d(left ‖ right)`. Layers with an odd number of nodes duplicate
//! the last node. The empty list hashes to the zero value, which no valid
//! block can produce (every block carries at least the coinbase).

use crate::types::{sha256d, Hash256};

/// Hash two sibling nodes into their parent.
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left.as_bytes());
    data[32..].copy_from_slice(right.as_bytes());
    sha256d(&data)
}

/// Compute the Merkle root of a list of txids.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::ZERO;
    }

    let mut layer = txids.to_vec();
    while layer.len() > 1 {
        layer = next_layer(&layer);
    }
    layer[0]
}

fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        next.push(node_hash(left, right));
        i += 2;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(merkle_root(&[]), Hash256::ZERO);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        assert_eq!(merkle_root(&[h(7)]), h(7));
    }

    #[test]
    fn two_leaves() {
        let root = merkle_root(&[h(1), h(2)]);
        assert_eq!(root, node_hash(&h(1), &h(2)));
    }

    #[test]
    fn odd_layer_duplicates_last() {
        // Three leaves: ((1,2),(3,3)).
        let root = merkle_root(&[h(1), h(2), h(3)]);
        let left = node_hash(&h(1), &h(2));
        let right = node_hash(&h(3), &h(3));
        assert_eq!(root, node_hash(&left, &right));
    }

    #[test]
    fn four_leaves() {
        let root = merkle_root(&[h(1), h(2), h(3), h(4)]);
        let left = node_hash(&h(1), &h(2));
        let right = node_hash(&h(3), &h(4));
        assert_eq!(root, node_hash(&left, &right));
    }

    #[test]
    fn order_matters() {
        assert_ne!(merkle_root(&[h(1), h(2)]), merkle_root(&[h(2), h(1)]));
    }

    #[test]
    fn changing_any_leaf_changes_root() {
        let base = merkle_root(&[h(1), h(2), h(3), h(4), h(5)]);
        for i in 0..5u8 {
            let mut leaves = vec![h(1), h(2), h(3), h(4), h(5)];
            leaves[i as usize] = h(0xF0 + i);
            assert_ne!(merkle_root(&leaves), base, "leaf {i}");
        }
    }
}
