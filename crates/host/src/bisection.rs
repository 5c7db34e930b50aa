//! Bisection challenge client

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use xlayer_core::{
    to_hex, BlockNumber, ChallengeEvent, ChooseSegmentMove, Confirmation, Notification, Segment,
    TimeTicks,
};
use xlayer_merkle::CommitmentTree;

use crate::challenge::ChallengeConnection;
use crate::error::{DisputeError, Result};
use crate::synchronizer::SyncHandle;

/// Where this client is within the current round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MovePhase {
    Idle,
    Selecting,
    AwaitingConfirmation,
    /// A move failed. Terminal.
    Failed,
}

/// Dispute state as last reported by the authoritative log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisputeState {
    /// Segment under dispute in the current round
    pub segment_index: u64,
    pub deadline: TimeTicks,
    /// Block of the last `Continued` event
    pub updated_at: BlockNumber,
    /// `Continued` events seen so far
    pub rounds: u64,
}

#[derive(Debug)]
struct ClientState {
    phase: MovePhase,
    dispute: Option<DisputeState>,
}

/// Bisection challenge: picks the disputed segment and proves its inclusion
#[derive(Debug)]
pub struct BisectionChallenge {
    conn: ChallengeConnection,
    state: RwLock<ClientState>,
}

impl BisectionChallenge {
    pub fn new(conn: ChallengeConnection) -> Self {
        Self {
            conn,
            state: RwLock::new(ClientState {
                phase: MovePhase::Idle,
                dispute: None,
            }),
        }
    }

    pub fn connection(&self) -> &ChallengeConnection {
        &self.conn
    }

    /// Follow this challenge's `Continued` events
    pub fn start_connection(&self, cancel: watch::Receiver<bool>) -> SyncHandle {
        let topics = self.conn.context().registry.bisection_topics();
        self.conn.start_connection(topics, cancel)
    }

    /// Apply a notification from the synchronizer.
    ///
    /// The log is authoritative: the dispute state is overwritten whatever
    /// the current move phase is.
    pub async fn observe(&self, notification: &Notification) -> Option<DisputeState> {
        if notification.dispute != self.conn.address() {
            warn!(
                dispute = %to_hex(&notification.dispute),
                "ignoring notification for another dispute"
            );
            return None;
        }

        let ChallengeEvent::Continued(event) = notification.event;
        let mut state = self.state.write().await;
        let rounds = state.dispute.map_or(0, |d| d.rounds) + 1;
        let next = DisputeState {
            segment_index: event.segment_index,
            deadline: event.deadline,
            updated_at: notification.block_height,
            rounds,
        };
        state.dispute = Some(next);
        info!(
            segment = next.segment_index,
            deadline = next.deadline.0,
            block = next.updated_at,
            phase = ?state.phase,
            "challenge continued"
        );
        Some(next)
    }

    pub async fn state(&self) -> Option<DisputeState> {
        self.state.read().await.dispute
    }

    pub async fn phase(&self) -> MovePhase {
        self.state.read().await.phase
    }

    /// Build the move for `segment_to_challenge` without submitting it
    pub fn prepare_move(&self, segment_to_challenge: u64, segments: &[Segment]) -> Result<ChooseSegmentMove> {
        if segments.is_empty() {
            return Err(DisputeError::InvalidInput("no segments to choose from".to_string()));
        }
        let index = usize::try_from(segment_to_challenge)
            .ok()
            .filter(|&i| i < segments.len())
            .ok_or(DisputeError::IndexOutOfRange {
                index: segment_to_challenge,
                len: segments.len(),
            })?;

        let tree = CommitmentTree::build(segments)?;
        Ok(ChooseSegmentMove {
            segment_index: segment_to_challenge,
            proof: tree.proof(index)?,
            root: tree.root(),
            leaf: tree.leaf(index)?,
        })
    }

    /// Commit to `segments` and challenge the one at `segment_to_challenge`.
    ///
    /// Returns once the move is confirmed. Callers must not overlap two
    /// moves on the same challenge.
    pub async fn choose_segment(&self, segment_to_challenge: u64, segments: &[Segment]) -> Result<Confirmation> {
        self.enter(MovePhase::Selecting).await?;

        let mv = match self.prepare_move(segment_to_challenge, segments) {
            Ok(mv) => mv,
            Err(err) => {
                // bad arguments leave the dispute untouched
                self.set_phase(MovePhase::Idle).await;
                return Err(err);
            }
        };
        debug!(
            segment = mv.segment_index,
            root = %to_hex(&mv.root),
            proof_len = mv.proof.len(),
            "choosing segment"
        );

        self.set_phase(MovePhase::AwaitingConfirmation).await;
        match self.conn.send(mv.calldata(), "ChooseSegment").await {
            Ok(confirmation) => {
                self.set_phase(MovePhase::Idle).await;
                Ok(confirmation)
            }
            Err(err) => {
                self.set_phase(MovePhase::Failed).await;
                Err(err)
            }
        }
    }

    async fn enter(&self, phase: MovePhase) -> Result<()> {
        let mut state = self.state.write().await;
        if state.phase == MovePhase::Failed {
            return Err(DisputeError::Terminated);
        }
        state.phase = phase;
        Ok(())
    }

    async fn set_phase(&self, phase: MovePhase) {
        self.state.write().await.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChallengeContext;
    use crate::memory::{continued_entry, MemoryLog, MemorySink, SinkOutcome};
    use std::sync::Arc;
    use std::time::Duration;
    use xlayer_core::ContinueChallengeEvent;
    use xlayer_merkle::MerkleProof;

    const DISPUTE: [u8; 20] = [0x42; 20];

    fn segments(n: u8) -> Vec<Segment> {
        (1..=n).map(|i| [i; 32]).collect()
    }

    fn challenge() -> (Arc<BisectionChallenge>, Arc<MemoryLog>, Arc<MemorySink>) {
        let log = Arc::new(MemoryLog::new());
        let sink = Arc::new(MemorySink::new());
        let conn = ChallengeConnection::new(DISPUTE, log.clone(), sink.clone(), ChallengeContext::default());
        (Arc::new(BisectionChallenge::new(conn)), log, sink)
    }

    fn continued(block: BlockNumber, segment_index: u64, deadline: u64) -> Notification {
        Notification {
            block_header: [0u8; 32],
            block_height: block,
            dispute: DISPUTE,
            event: ChallengeEvent::Continued(ContinueChallengeEvent {
                segment_index,
                deadline: TimeTicks(deadline),
            }),
            tx_hash: [0u8; 32],
        }
    }

    #[tokio::test]
    async fn test_move_for_four_segments() {
        let (client, _, sink) = challenge();
        let segs = segments(4);

        let mv = client.prepare_move(2, &segs).unwrap();
        assert_eq!(mv.proof.len(), 2);
        assert_eq!(mv.leaf, segs[2]);
        assert!(MerkleProof {
            index: 2,
            leaf: mv.leaf,
            siblings: mv.proof.clone(),
        }
        .verify(&mv.root));

        client.choose_segment(2, &segs).await.unwrap();
        let submitted = sink.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].to, DISPUTE);
        assert_eq!(submitted[0].data, mv.calldata());
        assert_eq!(client.phase().await, MovePhase::Idle);
    }

    #[tokio::test]
    async fn test_index_equal_to_len_is_rejected_without_submission() {
        let (client, _, sink) = challenge();
        let err = client.choose_segment(4, &segments(4)).await.unwrap_err();
        assert_eq!(err, DisputeError::IndexOutOfRange { index: 4, len: 4 });
        assert!(sink.submitted().is_empty());
        assert_eq!(client.phase().await, MovePhase::Idle);
    }

    #[tokio::test]
    async fn test_empty_segments_are_invalid() {
        let (client, _, sink) = challenge();
        let err = client.choose_segment(0, &[]).await.unwrap_err();
        assert!(matches!(err, DisputeError::InvalidInput(_)));
        assert!(sink.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_is_terminal() {
        let (client, _, sink) = challenge();
        sink.set_outcome(SinkOutcome::Timeout);

        let err = client.choose_segment(1, &segments(4)).await.unwrap_err();
        assert!(matches!(err, DisputeError::Submission(_)));
        assert_eq!(client.phase().await, MovePhase::Failed);

        sink.set_outcome(SinkOutcome::Confirm);
        assert_eq!(
            client.choose_segment(1, &segments(4)).await,
            Err(DisputeError::Terminated)
        );
        assert_eq!(sink.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_advances_state_while_awaiting_confirmation() {
        let (client, _, sink) = challenge();
        sink.hold();

        client.observe(&continued(3, 1, 100)).await;

        let mover = client.clone();
        let pending = tokio::spawn(async move { mover.choose_segment(1, &segments(4)).await });
        while client.phase().await != MovePhase::AwaitingConfirmation {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let state = client.observe(&continued(7, 3, 250)).await.unwrap();
        assert_eq!(state.segment_index, 3);
        assert_eq!(state.rounds, 2);
        assert_eq!(client.phase().await, MovePhase::AwaitingConfirmation);

        sink.release();
        pending.await.unwrap().unwrap();
        assert_eq!(client.phase().await, MovePhase::Idle);
        assert_eq!(
            client.state().await,
            Some(DisputeState {
                segment_index: 3,
                deadline: TimeTicks(250),
                updated_at: 7,
                rounds: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_notification_for_other_dispute_is_ignored() {
        let (client, _, _) = challenge();
        let mut foreign = continued(3, 1, 100);
        foreign.dispute = [0x01; 20];
        assert!(client.observe(&foreign).await.is_none());
        assert!(client.state().await.is_none());
    }

    #[tokio::test]
    async fn test_round_driven_by_synchronizer() {
        let (client, log, sink) = challenge();
        log.append(continued_entry(DISPUTE, 4, 2, 40));

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut handle = client.start_connection(cancel_rx);

        let notification = handle.notifications.recv().await.unwrap();
        let state = client.observe(&notification).await.unwrap();
        assert_eq!(state.segment_index, 2);

        let segs = segments(4);
        client.choose_segment(state.segment_index, &segs).await.unwrap();
        assert_eq!(sink.submitted()[0].data, client.prepare_move(2, &segs).unwrap().calldata());
    }
}
