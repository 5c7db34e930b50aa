//! Authoritative log interface

use async_trait::async_trait;
use tokio::sync::mpsc;
use xlayer_core::{Address, BlockHeader, BlockNumber, Hash, LogEntry};

use crate::error::{DisputeError, Result};

/// Selects logs emitted by one contract with one of the given signature topics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<Hash>,
}

impl LogFilter {
    pub fn new(address: Address, topics: Vec<Hash>) -> Self {
        Self { address, topics }
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        entry.address == self.address
            && entry.topic0().map_or(false, |topic| self.topics.contains(topic))
    }
}

/// A live log feed. Dropping it releases the underlying subscription.
#[derive(Debug)]
pub struct LogSubscription {
    pub logs: mpsc::Receiver<LogEntry>,
    /// Carries at most one error, after which the feed ends
    pub errors: mpsc::Receiver<DisputeError>,
}

impl LogSubscription {
    /// Stop the feed now rather than when dropped
    pub fn unsubscribe(mut self) {
        self.logs.close();
        self.errors.close();
    }
}

/// Read side of the authoritative log
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Height of the latest finalized block
    async fn head_height(&self) -> Result<BlockNumber>;

    /// Logs matching `filter` in `[from, to]`, in log order
    async fn query_logs(&self, filter: &LogFilter, from: BlockNumber, to: BlockNumber) -> Result<Vec<LogEntry>>;

    /// Logs matching `filter` at heights `>= from`, in log order, until dropped
    async fn subscribe_logs(&self, filter: &LogFilter, from: BlockNumber) -> Result<LogSubscription>;

    async fn header_by_hash(&self, hash: &Hash) -> Result<BlockHeader>;
}
