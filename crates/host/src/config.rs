//! Configuration

use serde::{Deserialize, Serialize};
use std::env;

/// Synchronizer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Live-log polling interval for RPC sources (milliseconds)
    pub poll_interval_ms: u64,
    /// Notifications buffered before the synchronizer waits on the consumer
    pub notification_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            notification_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.poll_interval_ms),
            notification_capacity: env::var("NOTIFICATION_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.notification_capacity),
        }
    }
}

/// Host configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// L1 RPC URL
    pub l1_rpc: String,
    /// Bisection challenge contract address
    pub dispute_address: Option<String>,
    /// Account moves are sent from (unlocked on the node)
    pub from_address: Option<String>,
    /// Seconds to wait for a move to be included
    pub confirmation_timeout_secs: u64,
    /// Gas limit for a `chooseSegment` transaction
    pub move_gas: u64,
    /// JSON file with the candidate segments (array of hex digests)
    pub segments_path: Option<String>,
    /// Segment to challenge with the segments from `segments_path`
    pub choose_segment: Option<u64>,
    /// Synchronizer configuration
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            l1_rpc: "http://localhost:8545".to_string(),
            dispute_address: None,
            from_address: None,
            confirmation_timeout_secs: 60,
            move_gas: 0x200000,
            segments_path: None,
            choose_segment: None,
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self {
            l1_rpc: env::var("L1_RPC").unwrap_or_else(|_| "http://localhost:8545".to_string()),
            dispute_address: env::var("DISPUTE_ADDRESS").ok(),
            from_address: env::var("FROM_ADDRESS").ok(),
            confirmation_timeout_secs: env::var("CONFIRMATION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            move_gas: env::var("MOVE_GAS")
                .ok()
                .and_then(|s| parse_u64(&s))
                .unwrap_or(0x200000),
            segments_path: env::var("SEGMENTS_PATH").ok(),
            choose_segment: env::var("CHOOSE_SEGMENT").ok().and_then(|s| s.parse().ok()),
            sync: SyncConfig::from_env(),
        }
    }
}

/// Decimal or `0x` hex
fn parse_u64(s: &str) -> Option<u64> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}
