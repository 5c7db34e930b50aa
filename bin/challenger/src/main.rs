//! Challenger binary

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use xlayer_core::{address_from_hex, hash_from_hex, Segment};
use xlayer_host::{
    BisectionChallenge, ChallengeConnection, ChallengeContext, Config, EventRegistry, RpcClient,
};

/// Read a JSON array of hex digests
fn load_segments(path: &str) -> Result<Vec<Segment>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let hexes: Vec<String> = serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;
    hexes
        .iter()
        .map(|h| hash_from_hex(h).map_err(|e| anyhow!("segment {h}: {e}")))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("╔═══════════════════════════════════════════════╗");
    info!("║     xlayer Bisection Challenge Client         ║");
    info!("╚═══════════════════════════════════════════════╝");

    // Load config from environment
    let config = Config::from_env();
    let dispute = config
        .dispute_address
        .as_deref()
        .ok_or_else(|| anyhow!("DISPUTE_ADDRESS is required"))
        .and_then(|s| address_from_hex(s).map_err(|e| anyhow!("DISPUTE_ADDRESS: {e}")))?;

    info!("");
    info!("Configuration:");
    info!("  L1 RPC:           {}", config.l1_rpc);
    info!("  Dispute:          0x{}", hex::encode(dispute));
    info!("  Poll interval:    {} ms", config.sync.poll_interval_ms);
    info!("  Confirm timeout:  {} s", config.confirmation_timeout_secs);
    info!("");

    let client = Arc::new(RpcClient::from_config(&config)?);
    let registry = Arc::new(EventRegistry::new());
    let context = ChallengeContext::new(registry, &config);
    let challenge = BisectionChallenge::new(ChallengeConnection::new(
        dispute,
        client.clone(),
        client,
        context,
    ));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut handle = challenge.start_connection(cancel_rx);

    if let (Some(path), Some(index)) = (config.segments_path.as_deref(), config.choose_segment) {
        let segments = load_segments(path)?;
        info!(segments = segments.len(), index, "submitting chooseSegment");
        let confirmation = challenge.choose_segment(index, &segments).await?;
        info!(block = confirmation.block_number, "chooseSegment confirmed");
    }

    info!("Challenger following dispute events...");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                let _ = cancel_tx.send(true);
                break;
            }
            Some(err) = handle.errors.recv() => {
                error!("Dispute sync failed: {}", err);
                return Err(err.into());
            }
            notification = handle.notifications.recv() => match notification {
                Some(notification) => {
                    if let Some(state) = challenge.observe(&notification).await {
                        info!(
                            "Round {}: segment {} under dispute, deadline tick {}",
                            state.rounds, state.segment_index, state.deadline.0
                        );
                    }
                }
                None => {
                    if let Ok(err) = handle.errors.try_recv() {
                        error!("Dispute sync failed: {}", err);
                        return Err(err.into());
                    }
                    warn!("Notification stream closed");
                    break;
                }
            },
        }
    }

    handle.task.await?;
    Ok(())
}
