//! Dispute client errors

use thiserror::Error;
use xlayer_core::CodecError;
use xlayer_merkle::MerkleError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DisputeError {
    /// Malformed or empty segment sequence
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("segment index {index} out of range for {len} segments")]
    IndexOutOfRange { index: u64, len: usize },

    /// A log entry did not match the registered event schema
    #[error("decode error: {0}")]
    Decode(String),

    /// Query, subscription or network failure against the authoritative log
    #[error("log source unavailable: {0}")]
    SourceUnavailable(String),

    /// Transaction rejected, reverted or not confirmed in time
    #[error("submission failed: {0}")]
    Submission(String),

    /// A previous move failed; this client accepts no further moves
    #[error("bisection client is in the failed state")]
    Terminated,
}

impl From<MerkleError> for DisputeError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::EmptyTree => Self::InvalidInput(err.to_string()),
            MerkleError::IndexOutOfRange { index, len } => Self::IndexOutOfRange {
                index: index as u64,
                len,
            },
        }
    }
}

impl From<CodecError> for DisputeError {
    fn from(err: CodecError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for DisputeError {
    fn from(err: reqwest::Error) -> Self {
        Self::SourceUnavailable(err.to_string())
    }
}

pub type Result<T, E = DisputeError> = std::result::Result<T, E>;
