//! Host-side logic for xlayer bisection disputes
//!
//! - [`DisputeSynchronizer`]: replays and tails one dispute's events
//! - [`BisectionChallenge`]: commits to segments and submits `chooseSegment`
//! - [`RpcClient`]: JSON-RPC log source and transaction sink
//! - [`memory`]: in-memory log and sink

pub mod bisection;
pub mod challenge;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod rpc;
pub mod sink;
pub mod source;
pub mod synchronizer;

pub use bisection::{BisectionChallenge, DisputeState, MovePhase};
pub use challenge::ChallengeConnection;
pub use config::{Config, SyncConfig};
pub use error::{DisputeError, Result};
pub use events::{ChallengeContext, EventRegistry};
pub use rpc::RpcClient;
pub use sink::{TxRequest, TxSink};
pub use source::{LogFilter, LogSource, LogSubscription};
pub use synchronizer::{DisputeSynchronizer, SyncHandle};
