//! JSON-RPC chain client used by the worker

use alloy_primitives::{Address, Bytes, U64};
use async_trait::async_trait;
use log::{debug, warn};
use myshop_sync::{ChainClientAdapter, ContractCall, LogFilter, RawLog, SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Serialize, Debug)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

#[derive(Deserialize, Debug)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Deserialize, Debug)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

/// EVM node adapter speaking JSON-RPC over HTTP
pub struct EvmRpcAdapter {
    rpc_url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
    max_retries: u32,
}

impl EvmRpcAdapter {
    pub fn new(rpc_url: String) -> Self {
        Self {
            rpc_url,
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Call `method`, retrying transport failures with jittered backoff.
    ///
    /// A JSON-RPC error object is an answer, not a transport failure, and is
    /// returned without retrying.
    async fn post(&self, method: &str, params: Vec<Value>) -> SyncResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: String::from("2.0"),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        };

        let mut retry_delay = Duration::from_millis(500);
        let max_delay = Duration::from_secs(16);
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            match self.send(&request).await {
                Ok(response) => {
                    if let Some(error) = response.error {
                        return Err(SyncError::ChainClient(format!(
                            "{} failed ({}): {}",
                            method, error.code, error.message
                        )));
                    }
                    return response.result.ok_or_else(|| {
                        SyncError::ChainClient(format!("{}: missing result", method))
                    });
                }
                Err(e) => {
                    last_error = e;
                    if attempt + 1 == self.max_retries {
                        break;
                    }

                    let jitter = {
                        use rand::Rng;
                        rand::thread_rng().gen_range(0..=100) as u64
                    };
                    retry_delay =
                        std::cmp::min(max_delay, retry_delay * 2 + Duration::from_millis(jitter));
                    warn!(
                        "{} request failed (attempt {}): {}, retrying in {:?}",
                        method,
                        attempt + 1,
                        last_error,
                        retry_delay
                    );
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }

        Err(SyncError::ChainClient(format!(
            "{} failed after {} attempts: {}",
            method, self.max_retries, last_error
        )))
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, String> {
        let response = self
            .http
            .post(&self.rpc_url)
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| format!("invalid JSON-RPC response: {}", e))
    }
}

/// `eth_getLogs` filter object. Trailing wildcard topics are dropped.
pub fn log_filter_params(filter: &LogFilter) -> Value {
    let mut topics: Vec<Value> = filter
        .topics
        .iter()
        .map(|topic| match topic {
            Some(t) => json!(t),
            None => Value::Null,
        })
        .collect();
    while topics.last() == Some(&Value::Null) {
        topics.pop();
    }

    json!({
        "address": filter.address,
        "fromBlock": format!("{:#x}", filter.from_block),
        "toBlock": format!("{:#x}", filter.to_block),
        "topics": topics,
    })
}

fn call_params(to: Address, data: &Bytes) -> Value {
    json!({ "to": to, "data": data })
}

#[async_trait]
impl ChainClientAdapter for EvmRpcAdapter {
    async fn get_block_number(&self) -> SyncResult<u64> {
        let result = self.post("eth_blockNumber", vec![]).await?;
        let number: U64 = serde_json::from_value(result)?;
        Ok(number.to::<u64>())
    }

    async fn get_logs(&self, filter: &LogFilter) -> SyncResult<Vec<RawLog>> {
        debug!(
            "eth_getLogs {} blocks {}..={}",
            filter.address, filter.from_block, filter.to_block
        );
        let result = self
            .post("eth_getLogs", vec![log_filter_params(filter)])
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn read_contract(&self, call: &ContractCall) -> SyncResult<Bytes> {
        let result = self
            .post(
                "eth_call",
                vec![call_params(call.address, &call.data), json!("latest")],
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn is_connected(&self) -> bool {
        self.get_block_number().await.is_ok()
    }
}
