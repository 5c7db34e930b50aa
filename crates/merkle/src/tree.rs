//! Commitment tree implementation

use crate::{hasher::Keccak256Hasher, proof::MerkleProof, MerkleError, PADDING_SEGMENT};

/// Perfect binary Merkle tree over an ordered segment sequence
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentTree {
    /// layers[0] holds the padded leaves, the last layer holds only the root
    layers: Vec<Vec<[u8; 32]>>,
    /// Number of real (unpadded) segments
    len: usize,
}

impl CommitmentTree {
    /// Build the tree. Fails on an empty sequence.
    pub fn build(segments: &[[u8; 32]]) -> Result<Self, MerkleError> {
        if segments.is_empty() {
            return Err(MerkleError::EmptyTree);
        }

        let width = segments.len().next_power_of_two();
        let mut leaves = Vec::with_capacity(width);
        leaves.extend_from_slice(segments);
        leaves.resize(width, PADDING_SEGMENT);

        let mut layers = vec![leaves];
        while let Some(below) = layers.last().filter(|layer| layer.len() > 1) {
            let next = below
                .chunks_exact(2)
                .map(|pair| Keccak256Hasher::hash_pair(&pair[0], &pair[1]))
                .collect();
            layers.push(next);
        }

        Ok(Self {
            layers,
            len: segments.len(),
        })
    }

    /// Get the root hash
    pub fn root(&self) -> [u8; 32] {
        // build() guarantees at least one layer with one node
        self.layers[self.layers.len() - 1][0]
    }

    /// Number of real segments
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of sibling hashes in every proof
    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    /// Leaf value at `index`
    pub fn leaf(&self, index: usize) -> Result<[u8; 32], MerkleError> {
        self.check_index(index)?;
        Ok(self.layers[0][index])
    }

    /// Sibling hashes from the leaf at `index` up to the root
    pub fn proof(&self, index: usize) -> Result<Vec<[u8; 32]>, MerkleError> {
        self.check_index(index)?;

        let mut position = index;
        let siblings = self.layers[..self.depth()]
            .iter()
            .map(|layer| {
                let sibling = layer[position ^ 1];
                position >>= 1;
                sibling
            })
            .collect();
        Ok(siblings)
    }

    /// Proof digests concatenated into one buffer
    pub fn proof_flat(&self, index: usize) -> Result<Vec<u8>, MerkleError> {
        Ok(self.proof(index)?.concat())
    }

    /// Proof bundled with its leaf and position
    pub fn merkle_proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        Ok(MerkleProof {
            index,
            leaf: self.leaf(index)?,
            siblings: self.proof(index)?,
        })
    }

    fn check_index(&self, index: usize) -> Result<(), MerkleError> {
        if index >= self.len {
            return Err(MerkleError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }
}
