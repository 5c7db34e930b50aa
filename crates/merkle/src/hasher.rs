//! Keccak256 node hasher

use tiny_keccak::{Hasher, Keccak};

/// Keccak256 hasher
#[derive(Debug)]
pub struct Keccak256Hasher;

impl Keccak256Hasher {
    /// Hash two 32-byte values together
    pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Keccak::v256();
        hasher.update(left);
        hasher.update(right);
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }
}
