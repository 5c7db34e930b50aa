//! Connection shared by every challenge type

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use xlayer_core::{to_hex, Address, Confirmation, Hash, PendingTx};

use crate::error::Result;
use crate::events::ChallengeContext;
use crate::sink::{TxRequest, TxSink};
use crate::source::LogSource;
use crate::synchronizer::{DisputeSynchronizer, SyncHandle};

/// A dispute contract plus the log and transaction endpoints used to talk to it
#[derive(Clone)]
pub struct ChallengeConnection {
    address: Address,
    source: Arc<dyn LogSource>,
    sink: Arc<dyn TxSink>,
    context: ChallengeContext,
}

impl std::fmt::Debug for ChallengeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeConnection")
            .field("address", &to_hex(&self.address))
            .field("context", &self.context)
            .finish()
    }
}

impl ChallengeConnection {
    pub fn new(
        address: Address,
        source: Arc<dyn LogSource>,
        sink: Arc<dyn TxSink>,
        context: ChallengeContext,
    ) -> Self {
        Self {
            address,
            source,
            sink,
            context,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn context(&self) -> &ChallengeContext {
        &self.context
    }

    /// Start following this contract's events with the given topics
    pub fn start_connection(&self, topics: Vec<Hash>, cancel: watch::Receiver<bool>) -> SyncHandle {
        DisputeSynchronizer::new(
            self.source.clone(),
            self.context.registry.clone(),
            self.address,
            topics,
            self.context.sync.notification_capacity,
        )
        .start(cancel)
    }

    /// Submit a call to the contract and wait for it to be included
    pub async fn send(&self, data: Vec<u8>, label: &str) -> Result<Confirmation> {
        let pending = self
            .sink
            .submit(TxRequest {
                to: self.address,
                data,
            })
            .await?;
        info!(
            call = label,
            tx = %to_hex(&pending.tx_hash),
            "submitted challenge transaction"
        );
        self.wait_for_receipt(&pending, label).await
    }

    pub async fn wait_for_receipt(&self, pending: &PendingTx, label: &str) -> Result<Confirmation> {
        match self
            .sink
            .await_confirmation(pending, self.context.confirmation_timeout)
            .await
        {
            Ok(confirmation) => {
                info!(
                    call = label,
                    tx = %to_hex(&confirmation.tx_hash),
                    block = confirmation.block_number,
                    "challenge transaction confirmed"
                );
                Ok(confirmation)
            }
            Err(err) => {
                warn!(call = label, tx = %to_hex(&pending.tx_hash), error = %err, "challenge transaction failed");
                Err(err)
            }
        }
    }
}
