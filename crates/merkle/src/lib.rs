//! Binary Merkle commitment over an ordered segment sequence
//!
//! - Leaves are the segments themselves, in order
//! - Leaf count is padded to the next power of two with [`PADDING_SEGMENT`]
//! - Internal node = keccak256(left ++ right)
//! - Proofs list sibling digests bottom-to-top

mod hasher;
mod proof;
mod tree;

use thiserror::Error;

pub use hasher::Keccak256Hasher;
pub use proof::MerkleProof;
pub use tree::CommitmentTree;

/// Filler for leaf positions past the real input (32 zero bytes)
pub const PADDING_SEGMENT: [u8; 32] = [0u8; 32];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("cannot build a commitment over zero segments")]
    EmptyTree,

    #[error("segment index {index} out of range for {len} segments")]
    IndexOutOfRange { index: usize, len: usize },
}
