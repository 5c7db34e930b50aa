//! Minimal ABI word codec and keccak helpers

use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

use crate::types::Hash;

/// ABI word size in bytes
pub const WORD: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("value does not fit in u64")]
    Overflow,

    #[error("invalid hex: {0}")]
    Hex(String),
}

/// Compute keccak256 hash
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Topic of an event, i.e. keccak256 of its canonical signature
pub fn event_topic(signature: &str) -> Hash {
    keccak256(signature.as_bytes())
}

/// 4-byte function selector
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encode a u64 as a big-endian uint256 word
pub fn encode_u64(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Decode a uint256 word that must fit in a u64
pub fn decode_u64(word: &[u8]) -> Result<u64, CodecError> {
    if word.len() != WORD {
        return Err(CodecError::Length {
            expected: WORD,
            actual: word.len(),
        });
    }
    if word[..24].iter().any(|&b| b != 0) {
        return Err(CodecError::Overflow);
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(bytes))
}

/// Split `data` into exactly `count` words
pub fn split_words(data: &[u8], count: usize) -> Result<Vec<&[u8]>, CodecError> {
    if data.len() != count * WORD {
        return Err(CodecError::Length {
            expected: count * WORD,
            actual: data.len(),
        });
    }
    Ok(data.chunks_exact(WORD).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selector() {
        // transfer(address,uint256)
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_keccak_empty() {
        assert_eq!(
            hex::encode(keccak256(&[])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_u64_words() {
        let word = encode_u64(0x0102_0304);
        assert_eq!(decode_u64(&word).unwrap(), 0x0102_0304);

        let mut big = [0u8; 32];
        big[0] = 1;
        assert_eq!(decode_u64(&big), Err(CodecError::Overflow));
        assert!(matches!(decode_u64(&[0u8; 31]), Err(CodecError::Length { .. })));
    }

    #[test]
    fn test_split_words() {
        let data = [0u8; 64];
        assert_eq!(split_words(&data, 2).unwrap().len(), 2);
        assert!(split_words(&data, 3).is_err());
        assert!(split_words(&data[..63], 2).is_err());
    }
}
