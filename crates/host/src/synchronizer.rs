//! Dispute event synchronization
//!
//! Replays every historical event for one dispute address, then tails the
//! live log, producing a single ordered stream of [`Notification`]s.
//!
//! Handoff: the head height `H` is read once. The live subscription is
//! anchored at `H + 1` and opened before the historical query over `[0, H]`
//! runs; live entries buffer until history has been emitted. An event at or
//! below `H` is therefore only ever delivered by history, and an event above
//! `H` only by the live feed.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use xlayer_core::{to_hex, Address, Hash, LogEntry, Notification};

use crate::error::{DisputeError, Result};
use crate::events::EventRegistry;
use crate::source::{LogFilter, LogSource};

/// Consumer side of a running synchronizer
#[derive(Debug)]
pub struct SyncHandle {
    pub notifications: mpsc::Receiver<Notification>,
    /// Receives at most one error; the synchronizer has stopped once it does
    pub errors: mpsc::Receiver<DisputeError>,
    pub task: JoinHandle<()>,
}

/// Follows the events of a single dispute
pub struct DisputeSynchronizer {
    source: Arc<dyn LogSource>,
    registry: Arc<EventRegistry>,
    filter: LogFilter,
    capacity: usize,
}

impl std::fmt::Debug for DisputeSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisputeSynchronizer")
            .field("dispute", &to_hex(&self.filter.address))
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Outcome of handing one entry to the consumer
enum Forwarded {
    Continue,
    Stop,
}

impl DisputeSynchronizer {
    pub fn new(
        source: Arc<dyn LogSource>,
        registry: Arc<EventRegistry>,
        dispute: Address,
        topics: Vec<Hash>,
        capacity: usize,
    ) -> Self {
        Self {
            source,
            registry,
            filter: LogFilter::new(dispute, topics),
            capacity: capacity.max(1),
        }
    }

    /// Spawn the background task. Must be called within a tokio runtime.
    ///
    /// Setting `cancel` to `true`, or dropping its sender, stops the task at
    /// its next suspension point and releases the live subscription.
    pub fn start(self, cancel: watch::Receiver<bool>) -> SyncHandle {
        let (notify_tx, notify_rx) = mpsc::channel(self.capacity);
        let (error_tx, error_rx) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            let dispute = to_hex(&self.filter.address);
            match self.run(&notify_tx, cancel).await {
                Ok(()) => info!(%dispute, "dispute synchronizer stopped"),
                Err(err) => {
                    error!(%dispute, error = %err, "dispute synchronizer failed");
                    let _ = error_tx.send(err).await;
                }
            }
        });

        SyncHandle {
            notifications: notify_rx,
            errors: error_rx,
            task,
        }
    }

    async fn run(&self, out: &mpsc::Sender<Notification>, mut cancel: watch::Receiver<bool>) -> Result<()> {
        if is_cancelled(&cancel) {
            return Ok(());
        }
        let head = self.source.head_height().await?;
        info!(dispute = %to_hex(&self.filter.address), head, "starting dispute sync");

        let anchor = head
            .checked_add(1)
            .ok_or_else(|| DisputeError::SourceUnavailable(format!("head height {head} has no successor")))?;
        let mut live = self.source.subscribe_logs(&self.filter, anchor).await?;

        if is_cancelled(&cancel) {
            return Ok(());
        }
        let mut history = self.source.query_logs(&self.filter, 0, head).await?;
        history.sort_by_key(|entry| (entry.block_number, entry.log_index));
        debug!(count = history.len(), head, "replaying historical dispute events");

        for entry in &history {
            if let Forwarded::Stop = self.forward(entry, out, &mut cancel).await? {
                return Ok(());
            }
        }

        info!(from = anchor, "history replayed, following live events");
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    info!("dispute sync cancelled");
                    live.unsubscribe();
                    return Ok(());
                }
                Some(err) = live.errors.recv() => return Err(err),
                entry = live.logs.recv() => {
                    let entry = entry.ok_or_else(|| {
                        DisputeError::SourceUnavailable("live log subscription closed".to_string())
                    })?;
                    if entry.block_number <= head {
                        warn!(
                            block = entry.block_number,
                            head,
                            "dropping live log at or below the replayed height"
                        );
                        continue;
                    }
                    if let Forwarded::Stop = self.forward(&entry, out, &mut cancel).await? {
                        live.unsubscribe();
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Decode one entry, resolve its block and push the notification
    async fn forward(
        &self,
        entry: &LogEntry,
        out: &mpsc::Sender<Notification>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Forwarded> {
        if is_cancelled(cancel) {
            return Ok(Forwarded::Stop);
        }
        if entry.address != self.filter.address {
            warn!(address = %to_hex(&entry.address), "skipping log from another contract");
            return Ok(Forwarded::Continue);
        }

        let Some(event) = self.registry.decode(entry)? else {
            let topic = entry.topic0().map(|t| to_hex(t)).unwrap_or_default();
            warn!(
                %topic,
                block = entry.block_number,
                tx = %to_hex(&entry.tx_hash),
                "skipping log with unrecognized topic"
            );
            return Ok(Forwarded::Continue);
        };

        let header = self.source.header_by_hash(&entry.block_hash).await?;
        let notification = Notification {
            block_header: header.hash,
            block_height: header.number,
            dispute: self.filter.address,
            event,
            tx_hash: entry.tx_hash,
        };
        debug!(block = header.number, ?event, "dispute event");

        tokio::select! {
            biased;
            _ = cancelled(cancel) => Ok(Forwarded::Stop),
            sent = out.send(notification) => match sent {
                Ok(()) => Ok(Forwarded::Continue),
                Err(_) => {
                    debug!("notification consumer dropped");
                    Ok(Forwarded::Stop)
                }
            },
        }
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || cancel.has_changed().is_err()
}

/// Resolves once cancellation is requested or the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{continued_entry, MemoryLog};
    use std::time::Duration;
    use tokio::time::timeout;
    use xlayer_core::{ChallengeEvent, ContinueChallengeEvent, TimeTicks};

    const DISPUTE: Address = [0x42; 20];

    fn start(log: &Arc<MemoryLog>) -> (SyncHandle, watch::Sender<bool>) {
        start_with_capacity(log, 16)
    }

    fn start_with_capacity(log: &Arc<MemoryLog>, capacity: usize) -> (SyncHandle, watch::Sender<bool>) {
        let registry = Arc::new(EventRegistry::new());
        let sync = DisputeSynchronizer::new(
            log.clone(),
            registry.clone(),
            DISPUTE,
            registry.bisection_topics(),
            capacity,
        );
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (sync.start(cancel_rx), cancel_tx)
    }

    async fn next(handle: &mut SyncHandle) -> Notification {
        timeout(Duration::from_secs(1), handle.notifications.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("notification stream closed")
    }

    async fn assert_quiet(handle: &mut SyncHandle) {
        assert!(
            timeout(Duration::from_millis(100), handle.notifications.recv())
                .await
                .is_err(),
            "unexpected notification"
        );
    }

    fn segment_of(n: &Notification) -> u64 {
        match n.event {
            ChallengeEvent::Continued(ev) => ev.segment_index,
        }
    }

    #[tokio::test]
    async fn test_history_then_live_without_gap_or_duplicate() {
        let log = Arc::new(MemoryLog::new());
        log.append(continued_entry(DISPUTE, 2, 0, 20));
        log.append(continued_entry(DISPUTE, 5, 1, 50));
        log.set_head(6);

        let (mut handle, _cancel) = start(&log);

        let first = next(&mut handle).await;
        let second = next(&mut handle).await;
        assert_eq!((first.block_height, segment_of(&first)), (2, 0));
        assert_eq!((second.block_height, segment_of(&second)), (5, 1));

        log.append(continued_entry(DISPUTE, 9, 2, 90));
        let third = next(&mut handle).await;
        assert_eq!((third.block_height, segment_of(&third)), (9, 2));
        assert_eq!(
            third.event,
            ChallengeEvent::Continued(ContinueChallengeEvent {
                segment_index: 2,
                deadline: TimeTicks(90),
            })
        );
        assert_eq!(third.dispute, DISPUTE);

        assert_quiet(&mut handle).await;
    }

    #[tokio::test]
    async fn test_event_above_snapshot_delivered_once_by_live_feed() {
        // height 9 is already in the log but not yet under the head
        let log = Arc::new(MemoryLog::new());
        log.append(continued_entry(DISPUTE, 2, 0, 20));
        log.append(continued_entry(DISPUTE, 5, 1, 50));
        log.append(continued_entry(DISPUTE, 9, 2, 90));
        log.set_head(6);

        let (mut handle, _cancel) = start(&log);

        let heights: Vec<_> = [
            next(&mut handle).await,
            next(&mut handle).await,
            next(&mut handle).await,
        ]
        .iter()
        .map(|n| n.block_height)
        .collect();
        assert_eq!(heights, vec![2, 5, 9]);
        assert_quiet(&mut handle).await;
    }

    #[tokio::test]
    async fn test_live_entry_below_anchor_is_dropped() {
        let log = Arc::new(MemoryLog::new());
        log.append(continued_entry(DISPUTE, 5, 1, 50));
        log.set_head(6);

        let (mut handle, _cancel) = start(&log);
        assert_eq!(next(&mut handle).await.block_height, 5);

        // a misbehaving feed replays height 5
        log.push_live_unchecked(continued_entry(DISPUTE, 5, 1, 50));
        assert_quiet(&mut handle).await;
    }

    #[tokio::test]
    async fn test_unrecognized_topic_is_skipped() {
        let log = Arc::new(MemoryLog::new());
        let mut unknown = continued_entry(DISPUTE, 3, 0, 0);
        unknown.topics[0] = [0xab; 32];
        log.append(unknown);
        log.append(continued_entry(DISPUTE, 4, 7, 70));
        log.set_head(4);

        let (mut handle, _cancel) = start(&log);
        let only = next(&mut handle).await;
        assert_eq!(segment_of(&only), 7);
        assert_quiet(&mut handle).await;
        assert!(handle.errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_decode_error_is_fatal() {
        let log = Arc::new(MemoryLog::new());
        log.append(continued_entry(DISPUTE, 2, 0, 20));
        let mut broken = continued_entry(DISPUTE, 3, 1, 30);
        broken.data.truncate(40);
        log.append(broken);
        log.append(continued_entry(DISPUTE, 4, 2, 40));

        let (mut handle, _cancel) = start(&log);
        assert_eq!(next(&mut handle).await.block_height, 2);

        let err = timeout(Duration::from_secs(1), handle.errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, DisputeError::Decode(_)));
        // nothing after the broken entry
        assert!(handle.notifications.recv().await.is_none());
        handle.task.await.unwrap();
        assert_eq!(log.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_missing_header_is_fatal() {
        let log = Arc::new(MemoryLog::new());
        let entry = continued_entry(DISPUTE, 2, 0, 20);
        log.append(entry.clone());
        log.forget_header(&entry.block_hash);

        let (mut handle, _cancel) = start(&log);
        let err = handle.errors.recv().await.unwrap();
        assert!(matches!(err, DisputeError::SourceUnavailable(_)));
        assert!(handle.notifications.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_subscription_error_is_surfaced_once() {
        let log = Arc::new(MemoryLog::new());
        log.set_head(3);

        let (mut handle, _cancel) = start(&log);
        log.wait_for_subscribers(1).await;
        log.fail_subscriptions(DisputeError::SourceUnavailable("connection reset".to_string()));

        let err = handle.errors.recv().await.unwrap();
        assert_eq!(err, DisputeError::SourceUnavailable("connection reset".to_string()));
        handle.task.await.unwrap();
        assert!(handle.errors.recv().await.is_none());
        assert!(handle.notifications.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_source_fails_start() {
        let log = Arc::new(MemoryLog::new());
        log.set_unavailable(true);

        let (mut handle, _cancel) = start(&log);
        let err = handle.errors.recv().await.unwrap();
        assert!(matches!(err, DisputeError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancellation_after_history_releases_subscription() {
        let log = Arc::new(MemoryLog::new());
        log.append(continued_entry(DISPUTE, 2, 0, 20));
        log.set_head(2);

        let (mut handle, cancel) = start(&log);
        assert_eq!(next(&mut handle).await.block_height, 2);
        assert_eq!(log.active_subscriptions(), 1);

        cancel.send(true).unwrap();
        timeout(Duration::from_secs(1), &mut handle.task)
            .await
            .unwrap()
            .unwrap();

        log.append(continued_entry(DISPUTE, 3, 1, 30));
        assert!(handle.notifications.recv().await.is_none());
        assert!(handle.errors.recv().await.is_none());
        assert_eq!(log.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_dropped_cancel_sender_stops_sync() {
        let log = Arc::new(MemoryLog::new());
        log.set_head(1);

        let (mut handle, cancel) = start(&log);
        drop(cancel);
        timeout(Duration::from_secs(1), &mut handle.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_send_on_full_queue() {
        let log = Arc::new(MemoryLog::new());
        for block in 1..=3 {
            log.append(continued_entry(DISPUTE, block, block, 10));
        }

        // one slot: the second history entry blocks on send
        let (handle, cancel) = start_with_capacity(&log, 1);
        log.wait_for_subscribers(1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.task.is_finished());

        cancel.send(true).unwrap();
        let SyncHandle {
            mut notifications,
            mut errors,
            task,
        } = handle;
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        assert_eq!(notifications.recv().await.map(|n| n.block_height), Some(1));
        assert!(notifications.recv().await.is_none());
        assert!(errors.recv().await.is_none());
        assert_eq!(log.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_live_overflow_fails_instead_of_skipping() {
        let log = Arc::new(MemoryLog::new());
        log.set_head(1);

        let (mut handle, _cancel) = start(&log);
        log.wait_for_subscribers(1).await;
        // far more than the source buffers, with nobody reading
        for block in 2..=1201 {
            log.append(continued_entry(DISPUTE, block, block, 10));
        }

        let err = timeout(Duration::from_secs(1), handle.errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(err, DisputeError::SourceUnavailable("subscription overflow".to_string()));

        // whatever made it through is an unbroken run from the anchor
        let mut heights = Vec::new();
        while let Some(n) = handle.notifications.recv().await {
            heights.push(n.block_height);
        }
        let expected: Vec<_> = (2..2 + heights.len() as u64).collect();
        assert_eq!(heights, expected);

        timeout(Duration::from_secs(1), &mut handle.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_head_at_max_height_is_an_error() {
        let log = Arc::new(MemoryLog::new());
        log.set_head(u64::MAX);

        let (mut handle, _cancel) = start(&log);
        let err = handle.errors.recv().await.unwrap();
        assert!(matches!(err, DisputeError::SourceUnavailable(_)));
        handle.task.await.unwrap();
        assert_eq!(log.active_subscriptions(), 0);
    }
}
