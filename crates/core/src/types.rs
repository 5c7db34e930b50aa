//! Common types

use serde::{Deserialize, Serialize};

use crate::abi::{self, CodecError};

/// 32-byte hash type
pub type Hash = [u8; 32];

/// One claimed unit of execution. Order within a sequence is its position in the disputed trace.
pub type Segment = Hash;

/// On-chain account or contract address
pub type Address = [u8; 20];

/// Block number type
pub type BlockNumber = u64;

/// Protocol tick counter bounding a move. Not wall-clock time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeTicks(pub u64);

/// Header fields the dispute client needs from a block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: Hash,
    pub number: BlockNumber,
    pub timestamp: u64,
}

/// A raw event log as returned by the authoritative log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    pub block_hash: Hash,
    pub block_number: BlockNumber,
    pub tx_hash: Hash,
    pub log_index: u64,
}

impl LogEntry {
    /// Event signature topic, if any
    pub fn topic0(&self) -> Option<&Hash> {
        self.topics.first()
    }
}

/// Payload of the `Continued` event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueChallengeEvent {
    /// Segment under dispute in the next round
    pub segment_index: u64,
    /// Tick by which the next move must land
    pub deadline: TimeTicks,
}

/// Decoded dispute events
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeEvent {
    Continued(ContinueChallengeEvent),
}

/// A decoded event, stamped with where it was finalized
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub block_header: Hash,
    pub block_height: BlockNumber,
    pub dispute: Address,
    pub event: ChallengeEvent,
    pub tx_hash: Hash,
}

/// The `chooseSegment` move of one bisection round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChooseSegmentMove {
    pub segment_index: u64,
    /// Sibling digests from leaf to root
    pub proof: Vec<Hash>,
    pub root: Hash,
    pub leaf: Hash,
}

impl ChooseSegmentMove {
    pub const SIGNATURE: &'static str = "chooseSegment(uint256,bytes,bytes32,bytes32)";

    /// Proof digests concatenated in order
    pub fn proof_bytes(&self) -> Vec<u8> {
        self.proof.concat()
    }

    /// ABI-encoded call data
    pub fn calldata(&self) -> Vec<u8> {
        let proof = self.proof_bytes();
        let mut out = Vec::with_capacity(4 + abi::WORD * 5 + proof.len());
        out.extend_from_slice(&abi::selector(Self::SIGNATURE));
        out.extend_from_slice(&abi::encode_u64(self.segment_index));
        // offset of `proof` from the start of the argument block
        out.extend_from_slice(&abi::encode_u64((abi::WORD * 4) as u64));
        out.extend_from_slice(&self.root);
        out.extend_from_slice(&self.leaf);
        out.extend_from_slice(&abi::encode_u64(proof.len() as u64));
        out.extend_from_slice(&proof);
        out
    }
}

/// A submitted, not yet confirmed transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTx {
    pub tx_hash: Hash,
}

/// A transaction included and executed successfully
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_hash: Hash,
    pub block_number: BlockNumber,
}

/// Parse a `0x`-prefixed 32-byte hex string
pub fn hash_from_hex(s: &str) -> Result<Hash, CodecError> {
    fixed_from_hex(s)
}

/// Parse a `0x`-prefixed 20-byte hex string
pub fn address_from_hex(s: &str) -> Result<Address, CodecError> {
    fixed_from_hex(s)
}

fn fixed_from_hex<const N: usize>(s: &str) -> Result<[u8; N], CodecError> {
    let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| CodecError::Hex(e.to_string()))?;
    bytes.as_slice().try_into().map_err(|_| CodecError::Length {
        expected: N,
        actual: bytes.len(),
    })
}

/// `0x`-prefixed lowercase hex
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
