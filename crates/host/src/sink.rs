//! Transaction sink interface

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use xlayer_core::{Address, Confirmation, PendingTx};

use crate::error::Result;

/// A state-changing call against a dispute contract
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    pub to: Address,
    pub data: Vec<u8>,
}

/// Write side of the authoritative log
#[async_trait]
pub trait TxSink: Send + Sync {
    async fn submit(&self, tx: TxRequest) -> Result<PendingTx>;

    /// Resolves once the transaction is included, or fails on revert or timeout
    async fn await_confirmation(&self, pending: &PendingTx, timeout: Duration) -> Result<Confirmation>;
}
