//! In-memory log source and transaction sink
//!
//! A scriptable stand-in for the authoritative log: entries are appended by
//! hand, the head height can be held back, and failures can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;
use xlayer_core::{
    abi, Address, BlockHeader, BlockNumber, Confirmation, Hash, LogEntry, PendingTx,
};

use crate::error::{DisputeError, Result};
use crate::events::CONTINUED_SIGNATURE;
use crate::sink::{TxRequest, TxSink};
use crate::source::{LogFilter, LogSource, LogSubscription};

/// Buffered live entries per subscriber
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Deterministic block hash for a height
pub fn block_hash_for(number: BlockNumber) -> Hash {
    abi::keccak256(&number.to_be_bytes())
}

/// A `Continued` log for `dispute` at `block`
pub fn continued_entry(dispute: Address, block: BlockNumber, segment_index: u64, deadline: u64) -> LogEntry {
    LogEntry {
        address: dispute,
        topics: vec![abi::event_topic(CONTINUED_SIGNATURE)],
        data: [abi::encode_u64(segment_index), abi::encode_u64(deadline)].concat(),
        block_hash: block_hash_for(block),
        block_number: block,
        tx_hash: abi::keccak256(&[&block.to_be_bytes()[..], &segment_index.to_be_bytes()[..]].concat()),
        log_index: 0,
    }
}

struct Subscriber {
    filter: LogFilter,
    from: BlockNumber,
    logs: mpsc::Sender<LogEntry>,
    errors: mpsc::Sender<DisputeError>,
}

impl Subscriber {
    fn wants(&self, entry: &LogEntry) -> bool {
        entry.block_number >= self.from && self.filter.matches(entry)
    }

    /// Returns `false` once the subscription is over: the consumer is gone,
    /// or the buffer overflowed and the overflow went out on `errors`.
    fn deliver(&self, entry: &LogEntry) -> bool {
        match self.logs.try_send(entry.clone()) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(_)) => {
                warn!(block = entry.block_number, "memory subscription buffer full, ending subscription");
                let _ = self
                    .errors
                    .try_send(DisputeError::SourceUnavailable("subscription overflow".to_string()));
                false
            }
        }
    }
}

#[derive(Default)]
struct LogState {
    head: BlockNumber,
    entries: Vec<LogEntry>,
    headers: HashMap<Hash, BlockHeader>,
    subscribers: Vec<Subscriber>,
    unavailable: bool,
}

/// Append-only in-memory log
#[derive(Default)]
pub struct MemoryLog {
    state: Mutex<LogState>,
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryLog")
            .field("head", &state.head)
            .field("entries", &state.entries.len())
            .finish()
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        // a panicking test thread must not hide the log from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry, register its block header and raise the head to it.
    /// Live subscribers whose anchor covers the entry receive it.
    pub fn append(&self, entry: LogEntry) {
        let mut state = self.lock();
        state.headers.entry(entry.block_hash).or_insert(BlockHeader {
            hash: entry.block_hash,
            number: entry.block_number,
            timestamp: entry.block_number * 12,
        });
        state.head = state.head.max(entry.block_number);
        state.subscribers.retain(|sub| {
            if sub.logs.is_closed() {
                false
            } else if sub.wants(&entry) {
                sub.deliver(&entry)
            } else {
                true
            }
        });
        state.entries.push(entry);
    }

    /// Deliver straight to live subscribers, ignoring their anchors, without recording
    pub fn push_live_unchecked(&self, entry: LogEntry) {
        let mut state = self.lock();
        state
            .subscribers
            .retain(|sub| !sub.filter.matches(&entry) || sub.deliver(&entry));
    }

    pub fn set_head(&self, head: BlockNumber) {
        self.lock().head = head;
    }

    pub fn insert_header(&self, header: BlockHeader) {
        self.lock().headers.insert(header.hash, header);
    }

    pub fn forget_header(&self, hash: &Hash) {
        self.lock().headers.remove(hash);
    }

    /// Make every read fail with `SourceUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Report `err` on every live subscription and end them
    pub fn fail_subscriptions(&self, err: DisputeError) {
        let mut state = self.lock();
        for sub in state.subscribers.drain(..) {
            let _ = sub.errors.try_send(err.clone());
        }
    }

    /// Subscriptions whose consumer is still attached
    pub fn active_subscriptions(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|sub| !sub.logs.is_closed());
        state.subscribers.len()
    }

    /// Wait until at least `count` subscriptions are attached
    pub async fn wait_for_subscribers(&self, count: usize) {
        while self.active_subscriptions() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.lock().unavailable {
            return Err(DisputeError::SourceUnavailable("memory log offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogSource for MemoryLog {
    async fn head_height(&self) -> Result<BlockNumber> {
        self.check_available()?;
        Ok(self.lock().head)
    }

    async fn query_logs(&self, filter: &LogFilter, from: BlockNumber, to: BlockNumber) -> Result<Vec<LogEntry>> {
        self.check_available()?;
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| (from..=to).contains(&e.block_number) && filter.matches(e))
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, filter: &LogFilter, from: BlockNumber) -> Result<LogSubscription> {
        self.check_available()?;
        let (log_tx, log_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(1);
        let sub = Subscriber {
            filter: filter.clone(),
            from,
            logs: log_tx,
            errors: err_tx,
        };

        let mut state = self.lock();
        // entries already appended above the anchor
        let caught_up = state.entries.iter().filter(|e| sub.wants(e)).all(|e| sub.deliver(e));
        if caught_up {
            state.subscribers.push(sub);
        }

        Ok(LogSubscription {
            logs: log_rx,
            errors: err_rx,
        })
    }

    async fn header_by_hash(&self, hash: &Hash) -> Result<BlockHeader> {
        self.check_available()?;
        self.lock()
            .headers
            .get(hash)
            .cloned()
            .ok_or_else(|| DisputeError::SourceUnavailable(format!("unknown block {}", hex::encode(hash))))
    }
}

/// How [`MemorySink`] answers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkOutcome {
    Confirm,
    /// Refused at submission
    Reject(String),
    /// Accepted but never included
    Timeout,
}

/// Transaction sink that records what it is given
#[derive(Debug)]
pub struct MemorySink {
    submitted: Mutex<Vec<TxRequest>>,
    outcome: Mutex<SinkOutcome>,
    next_block: AtomicU64,
    held: AtomicBool,
    gate: Semaphore,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            outcome: Mutex::new(SinkOutcome::Confirm),
            next_block: AtomicU64::new(100),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outcome(&self, outcome: SinkOutcome) {
        *self.outcome.lock().unwrap_or_else(|p| p.into_inner()) = outcome;
    }

    /// Every request submitted so far
    pub fn submitted(&self) -> Vec<TxRequest> {
        self.submitted.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Keep confirmations pending until [`MemorySink::release`]
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let one held confirmation through
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    fn outcome(&self) -> SinkOutcome {
        self.outcome.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl TxSink for MemorySink {
    async fn submit(&self, tx: TxRequest) -> Result<PendingTx> {
        if let SinkOutcome::Reject(reason) = self.outcome() {
            return Err(DisputeError::Submission(reason));
        }
        let tx_hash = abi::keccak256(&tx.data);
        self.submitted.lock().unwrap_or_else(|p| p.into_inner()).push(tx);
        Ok(PendingTx { tx_hash })
    }

    async fn await_confirmation(&self, pending: &PendingTx, timeout: Duration) -> Result<Confirmation> {
        if self.held.load(Ordering::SeqCst) {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| DisputeError::Submission("sink closed".to_string()))?;
            permit.forget();
        }
        match self.outcome() {
            SinkOutcome::Timeout => Err(DisputeError::Submission(format!(
                "transaction {} not confirmed within {:?}",
                hex::encode(pending.tx_hash),
                timeout
            ))),
            SinkOutcome::Reject(reason) => Err(DisputeError::Submission(reason)),
            SinkOutcome::Confirm => Ok(Confirmation {
                tx_hash: pending.tx_hash,
                block_number: self.next_block.fetch_add(1, Ordering::SeqCst),
            }),
        }
    }
}
