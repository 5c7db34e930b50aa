//! Inclusion proof verification

use serde::{Deserialize, Serialize};

use crate::hasher::Keccak256Hasher;

/// Inclusion proof for one leaf
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf position
    pub index: usize,
    /// The leaf value
    pub leaf: [u8; 32],
    /// Sibling hashes from leaf to root
    pub siblings: Vec<[u8; 32]>,
}

impl MerkleProof {
    /// Verify this proof against a root hash
    pub fn verify(&self, root: &[u8; 32]) -> bool {
        // index must fit in a tree of this depth
        if self.siblings.len() < usize::BITS as usize && self.index >> self.siblings.len() != 0 {
            return false;
        }
        self.compute_root() == *root
    }

    /// Compute root from proof
    pub fn compute_root(&self) -> [u8; 32] {
        let mut current = self.leaf;
        let mut position = self.index;

        for sibling in &self.siblings {
            current = if position & 1 == 1 {
                Keccak256Hasher::hash_pair(sibling, &current)
            } else {
                Keccak256Hasher::hash_pair(&current, sibling)
            };
            position >>= 1;
        }

        current
    }

    /// Rebuild a proof from the flattened byte form used on the wire
    pub fn from_flat(index: usize, leaf: [u8; 32], flat: &[u8]) -> Option<Self> {
        if flat.len() % 32 != 0 {
            return None;
        }
        let siblings = flat
            .chunks_exact(32)
            .map(|chunk| {
                let mut node = [0u8; 32];
                node.copy_from_slice(chunk);
                node
            })
            .collect();
        Some(Self {
            index,
            leaf,
            siblings,
        })
    }
}
