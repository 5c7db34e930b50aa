//! Dispute event schema

use std::sync::Arc;
use std::time::Duration;

use xlayer_core::{abi, ChallengeEvent, ContinueChallengeEvent, Hash, LogEntry, TimeTicks};

use crate::config::{Config, SyncConfig};
use crate::error::{DisputeError, Result};

/// Canonical signature of the event emitted after each bisection round
pub const CONTINUED_SIGNATURE: &str = "Continued(uint256,uint256)";

/// Topic ids of the events this client understands, computed once
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRegistry {
    continued: Hash,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            continued: abi::event_topic(CONTINUED_SIGNATURE),
        }
    }

    pub fn continued_topic(&self) -> Hash {
        self.continued
    }

    /// Topics a bisection challenge subscribes to
    pub fn bisection_topics(&self) -> Vec<Hash> {
        vec![self.continued]
    }

    /// Decode a log entry.
    ///
    /// Returns `Ok(None)` for entries whose topic is not registered.
    pub fn decode(&self, entry: &LogEntry) -> Result<Option<ChallengeEvent>> {
        match entry.topic0() {
            Some(topic) if *topic == self.continued => {
                let words = abi::split_words(&entry.data, 2)
                    .map_err(|e| DisputeError::Decode(format!("Continued: {e}")))?;
                let segment_index = abi::decode_u64(words[0])
                    .map_err(|e| DisputeError::Decode(format!("Continued.segmentIndex: {e}")))?;
                let deadline = abi::decode_u64(words[1])
                    .map_err(|e| DisputeError::Decode(format!("Continued.deadlineTicks: {e}")))?;
                Ok(Some(ChallengeEvent::Continued(ContinueChallengeEvent {
                    segment_index,
                    deadline: TimeTicks(deadline),
                })))
            }
            _ => Ok(None),
        }
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, process-wide settings handed to every challenge
#[derive(Clone, Debug)]
pub struct ChallengeContext {
    pub registry: Arc<EventRegistry>,
    pub sync: SyncConfig,
    pub confirmation_timeout: Duration,
}

impl ChallengeContext {
    pub fn new(registry: Arc<EventRegistry>, config: &Config) -> Self {
        Self {
            registry,
            sync: config.sync.clone(),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        }
    }
}

impl Default for ChallengeContext {
    fn default() -> Self {
        Self::new(Arc::new(EventRegistry::new()), &Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(topics: Vec<Hash>, data: Vec<u8>) -> LogEntry {
        LogEntry {
            address: [0x11; 20],
            topics,
            data,
            block_hash: [0u8; 32],
            block_number: 1,
            tx_hash: [0u8; 32],
            log_index: 0,
        }
    }

    fn continued_data(index: u64, deadline: u64) -> Vec<u8> {
        [abi::encode_u64(index), abi::encode_u64(deadline)].concat()
    }

    #[test]
    fn test_topic_is_signature_hash() {
        let registry = EventRegistry::new();
        assert_eq!(
            registry.continued_topic(),
            abi::keccak256(b"Continued(uint256,uint256)")
        );
        assert_eq!(registry, EventRegistry::default());
    }

    #[test]
    fn test_decode_continued() {
        let registry = EventRegistry::new();
        let log = entry(vec![registry.continued_topic()], continued_data(3, 1_200));

        let event = registry.decode(&log).unwrap();
        assert_eq!(
            event,
            Some(ChallengeEvent::Continued(ContinueChallengeEvent {
                segment_index: 3,
                deadline: TimeTicks(1_200),
            }))
        );
    }

    #[test]
    fn test_unknown_topic_is_skipped() {
        let registry = EventRegistry::new();
        let other = abi::event_topic("Bisected(bytes32[],uint256)");
        assert_eq!(registry.decode(&entry(vec![other], vec![1, 2, 3])).unwrap(), None);
        assert_eq!(registry.decode(&entry(vec![], vec![])).unwrap(), None);
    }

    #[test]
    fn test_malformed_payload_is_decode_error() {
        let registry = EventRegistry::new();
        let topic = registry.continued_topic();

        let short = entry(vec![topic], vec![0u8; 63]);
        assert!(matches!(registry.decode(&short), Err(DisputeError::Decode(_))));

        let mut data = continued_data(1, 1);
        data[0] = 0xff;
        let overflow = entry(vec![topic], data);
        assert!(matches!(registry.decode(&overflow), Err(DisputeError::Decode(_))));
    }
}
