//! xlayer dispute core types
//!
//! Shared between the commitment tree, the dispute synchronizer and the
//! bisection client:
//! - Digests, addresses and tick deadlines
//! - Raw log entries and decoded notifications
//! - The `chooseSegment` move and its ABI encoding

pub mod abi;
pub mod types;

pub use abi::CodecError;
pub use types::*;
