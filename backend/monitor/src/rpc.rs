//! Ethereum JSON-RPC client shared by the chain reader and the event
//! subscriber.
//!
//! Only the three methods the monitor needs are wrapped: `eth_blockNumber`,
//! `eth_call` and `eth_getLogs`. Retry policy is left to the callers; a
//! failed request surfaces as a [`ChainQueryError`] straight away.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Address, Bytes, B256, U64};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{ChainQueryError, QueryResult};
use crate::events::EventKey;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// A log entry as returned by `eth_getLogs`.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<U64>,
    pub log_index: Option<U64>,
    pub transaction_hash: Option<B256>,
    /// Set by the node when the log was dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// Position of the log on chain. Pending logs have none.
    pub fn key(&self) -> QueryResult<EventKey> {
        match (self.block_number, self.log_index) {
            (Some(block_number), Some(log_index)) => Ok(EventKey {
                block_number: block_number.to::<u64>(),
                log_index: log_index.to::<u64>(),
            }),
            _ => Err(ChainQueryError::InvalidResponse(format!(
                "log without block number or log index (tx {:?})",
                self.transaction_hash
            ))),
        }
    }
}

/// Block height a contract read is evaluated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl BlockTag {
    fn as_param(&self) -> Value {
        match self {
            Self::Latest => json!("latest"),
            Self::Number(number) => json!(quantity(*number)),
        }
    }
}

/// `eth_getLogs` filter for one event of one contract over a closed block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    fn as_param(&self) -> Value {
        json!({
            "address": self.address,
            "topics": [self.topic0],
            "fromBlock": quantity(self.from_block),
            "toBlock": quantity(self.to_block),
        })
    }
}

fn quantity(value: u64) -> String {
    format!("0x{value:x}")
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

pub struct RpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one JSON-RPC request and decode its `result`.
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> QueryResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        // Some nodes put a JSON-RPC error object in a non-2xx response, so the
        // status only matters when the body is not an envelope.
        let envelope: RpcResponse<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => return Err(ChainQueryError::Status(status)),
            Err(e) => return Err(e.into()),
        };

        if let Some(err) = envelope.error {
            return Err(ChainQueryError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        debug!(method, id, "RPC request succeeded");

        envelope
            .result
            .ok_or_else(|| ChainQueryError::InvalidResponse(format!("Empty result from {method}")))
    }

    pub async fn block_number(&self) -> QueryResult<u64> {
        let head: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(head.to::<u64>())
    }

    /// `eth_call` against `to` with raw calldata.
    pub async fn call(&self, to: Address, calldata: &[u8], block: BlockTag) -> QueryResult<Bytes> {
        let tx = json!({
            "to": to,
            "data": format!("0x{}", hex::encode(calldata)),
        });
        self.request("eth_call", json!([tx, block.as_param()])).await
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> QueryResult<Vec<RawLog>> {
        self.request("eth_getLogs", json!([filter.as_param()])).await
    }
}
