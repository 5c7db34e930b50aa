//! JSON-RPC log source and transaction sink

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use xlayer_core::{
    address_from_hex, hash_from_hex, to_hex, Address, BlockHeader, BlockNumber, CodecError,
    Confirmation, Hash, LogEntry, PendingTx,
};

use crate::config::Config;
use crate::error::{DisputeError, Result};
use crate::sink::{TxRequest, TxSink};
use crate::source::{LogFilter, LogSource, LogSubscription};

/// Live entries buffered per polling subscription
const SUBSCRIPTION_BUFFER: usize = 256;

/// Ethereum JSON-RPC client
#[derive(Clone, Debug)]
pub struct RpcClient {
    http_client: reqwest::Client,
    url: String,
    /// Unlocked account moves are sent from
    from: Option<Address>,
    gas: u64,
    poll_interval: Duration,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            url: url.into(),
            from: None,
            gas: 0x200000,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let from = config
            .from_address
            .as_deref()
            .map(address_from_hex)
            .transpose()
            .map_err(|e| DisputeError::InvalidInput(format!("FROM_ADDRESS: {e}")))?;
        Ok(Self {
            from,
            gas: config.move_gas,
            poll_interval: Duration::from_millis(config.sync.poll_interval_ms.max(1)),
            ..Self::new(config.l1_rpc.clone())
        })
    }

    /// Call RPC
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .json::<Value>()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(DisputeError::SourceUnavailable(format!("{method}: {error}")));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| DisputeError::SourceUnavailable(format!("{method}: no result in response")))
    }

    /// Fetch everything from `cursor` up to the current head.
    /// Returns the entries and the next cursor.
    async fn poll_logs(&self, filter: &LogFilter, cursor: BlockNumber) -> Result<(Vec<LogEntry>, BlockNumber)> {
        let head = self.head_height().await?;
        match PollWindow::at(head, cursor)? {
            None => Ok((Vec::new(), cursor)),
            Some(window) => {
                let logs = self.query_logs(filter, window.from, window.to).await?;
                Ok((logs, window.next))
            }
        }
    }

    async fn receipt(&self, tx_hash: &Hash) -> Result<Option<Value>> {
        let receipt = self
            .rpc_call("eth_getTransactionReceipt", json!([to_hex(tx_hash)]))
            .await?;
        Ok((!receipt.is_null()).then_some(receipt))
    }
}

/// Blocks covered by one poll of the live feed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PollWindow {
    from: BlockNumber,
    to: BlockNumber,
    /// Cursor for the poll after this one
    next: BlockNumber,
}

impl PollWindow {
    /// `None` while the chain has not reached `cursor`
    fn at(head: BlockNumber, cursor: BlockNumber) -> Result<Option<Self>> {
        if head < cursor {
            return Ok(None);
        }
        let next = head
            .checked_add(1)
            .ok_or_else(|| DisputeError::SourceUnavailable(format!("head height {head} has no successor")))?;
        Ok(Some(Self {
            from: cursor,
            to: head,
            next,
        }))
    }
}

#[async_trait]
impl LogSource for RpcClient {
    async fn head_height(&self) -> Result<BlockNumber> {
        let result = self.rpc_call("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }

    async fn query_logs(&self, filter: &LogFilter, from: BlockNumber, to: BlockNumber) -> Result<Vec<LogEntry>> {
        let topics: Vec<String> = filter.topics.iter().map(|t| to_hex(t)).collect();
        let result = self
            .rpc_call(
                "eth_getLogs",
                json!([{
                    "address": to_hex(&filter.address),
                    "topics": [topics],
                    "fromBlock": format!("0x{from:x}"),
                    "toBlock": format!("0x{to:x}"),
                }]),
            )
            .await?;

        let raw: Vec<RpcLog> = serde_json::from_value(result)
            .map_err(|e| DisputeError::Decode(format!("eth_getLogs: {e}")))?;
        raw.into_iter()
            .filter(|log| {
                if log.removed {
                    warn!(tx = ?log.transaction_hash, "skipping removed log");
                }
                !log.removed
            })
            .map(RpcLog::into_entry)
            .collect()
    }

    async fn subscribe_logs(&self, filter: &LogFilter, from: BlockNumber) -> Result<LogSubscription> {
        let (log_tx, log_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(1);
        let client = self.clone();
        let filter = filter.clone();

        tokio::spawn(async move {
            let mut cursor = from;
            let mut ticker = tokio::time::interval(client.poll_interval);
            loop {
                tokio::select! {
                    _ = log_tx.closed() => {
                        debug!(cursor, "log subscription released");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                match client.poll_logs(&filter, cursor).await {
                    Ok((entries, next)) => {
                        for entry in entries {
                            if log_tx.send(entry).await.is_err() {
                                return;
                            }
                        }
                        cursor = next;
                    }
                    Err(err) => {
                        let _ = err_tx.send(err).await;
                        return;
                    }
                }
            }
        });

        info!(from, "polling for live dispute logs");
        Ok(LogSubscription {
            logs: log_rx,
            errors: err_rx,
        })
    }

    async fn header_by_hash(&self, hash: &Hash) -> Result<BlockHeader> {
        let block = self
            .rpc_call("eth_getBlockByHash", json!([to_hex(hash), false]))
            .await?;
        if block.is_null() {
            return Err(DisputeError::SourceUnavailable(format!("block {} not found", to_hex(hash))));
        }
        Ok(BlockHeader {
            hash: parse_hash(field(&block, "hash")?)?,
            number: parse_quantity(field(&block, "number")?)?,
            timestamp: parse_quantity(field(&block, "timestamp")?)?,
        })
    }
}

#[async_trait]
impl TxSink for RpcClient {
    async fn submit(&self, tx: TxRequest) -> Result<PendingTx> {
        let from = self
            .from
            .ok_or_else(|| DisputeError::Submission("no sender account configured".to_string()))?;

        let tx_request = json!({
            "from": to_hex(&from),
            "to": to_hex(&tx.to),
            "data": to_hex(&tx.data),
            "gas": format!("0x{:x}", self.gas),
        });
        let result = self
            .rpc_call("eth_sendTransaction", json!([tx_request]))
            .await
            .map_err(as_submission)?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| DisputeError::Submission("no tx hash in response".to_string()))
            .and_then(|s| hash_from_hex(s).map_err(|e| DisputeError::Submission(e.to_string())))?;

        Ok(PendingTx { tx_hash })
    }

    async fn await_confirmation(&self, pending: &PendingTx, timeout: Duration) -> Result<Confirmation> {
        tokio::time::timeout(timeout, self.poll_receipt(pending))
            .await
            .map_err(|_| {
                DisputeError::Submission(format!(
                    "transaction {} not confirmed within {:?}",
                    to_hex(&pending.tx_hash),
                    timeout
                ))
            })?
    }
}

impl RpcClient {
    async fn poll_receipt(&self, pending: &PendingTx) -> Result<Confirmation> {
        loop {
            if let Some(receipt) = self.receipt(&pending.tx_hash).await.map_err(as_submission)? {
                let status = receipt.get("status").and_then(Value::as_str);
                if status != Some("0x1") {
                    return Err(DisputeError::Submission(format!(
                        "transaction {} reverted",
                        to_hex(&pending.tx_hash)
                    )));
                }
                let block_number = field(&receipt, "blockNumber")
                    .and_then(parse_quantity)
                    .map_err(as_submission)?;
                return Ok(Confirmation {
                    tx_hash: pending.tx_hash,
                    block_number,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn as_submission(err: DisputeError) -> DisputeError {
    match err {
        DisputeError::Submission(_) => err,
        other => DisputeError::Submission(other.to_string()),
    }
}

/// Log object as returned by `eth_getLogs`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_hash: Option<String>,
    block_number: Option<String>,
    transaction_hash: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

impl RpcLog {
    fn into_entry(self) -> Result<LogEntry> {
        let pending = || DisputeError::Decode("log from a pending block".to_string());
        Ok(LogEntry {
            address: address_from_hex(&self.address)?,
            topics: self
                .topics
                .iter()
                .map(|t| hash_from_hex(t))
                .collect::<std::result::Result<Vec<_>, CodecError>>()?,
            data: hex::decode(self.data.trim_start_matches("0x"))
                .map_err(|e| DisputeError::Decode(format!("log data: {e}")))?,
            block_hash: hash_from_hex(self.block_hash.as_deref().ok_or_else(pending)?)?,
            block_number: parse_quantity_str(self.block_number.as_deref().ok_or_else(pending)?)?,
            tx_hash: hash_from_hex(self.transaction_hash.as_deref().ok_or_else(pending)?)?,
            log_index: parse_quantity_str(self.log_index.as_deref().ok_or_else(pending)?)?,
        })
    }
}

fn field<'a>(object: &'a Value, name: &str) -> Result<&'a Value> {
    object
        .get(name)
        .ok_or_else(|| DisputeError::Decode(format!("missing field {name}")))
}

fn parse_quantity(value: &Value) -> Result<u64> {
    let s = value
        .as_str()
        .ok_or_else(|| DisputeError::Decode(format!("expected hex quantity, got {value}")))?;
    parse_quantity_str(s)
}

fn parse_quantity_str(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| DisputeError::Decode(format!("invalid quantity {s}: {e}")))
}

fn parse_hash(value: &Value) -> Result<Hash> {
    let s = value
        .as_str()
        .ok_or_else(|| DisputeError::Decode(format!("expected hash, got {value}")))?;
    Ok(hash_from_hex(s)?)
}
