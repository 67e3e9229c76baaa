/// Node JSON-RPC client
///
/// One HTTP/1 connection pool shared by the consensus, world-state, network
/// and transaction-pool collaborators, guarded by a circuit breaker.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Buf, Method, Request};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidepool_core::blockchain::block::{Block, Hash};
use tidepool_core::blockchain::consensus::BlockStatus;
use tidepool_core::tx::SignedTx;
use tokio::sync::RwLock;

use super::{
    Account, ChainCandidate, ChainTip, Consensus, Network, NextStateRequest, StateTransition, TxPool,
    WorldState,
};
use crate::metrics::prometheus as metrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone)]
struct CircuitBreaker {
    failures: u32,
    last_failure: Option<Instant>,
    is_open: bool,
    max_failures: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            failures: 0,
            last_failure: None,
            is_open: false,
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        self.last_failure = Some(Instant::now());
        if self.failures >= self.max_failures && !self.is_open {
            self.is_open = true;
            tracing::error!(
                "Node RPC circuit breaker tripped after {} failures, pausing for {}s",
                self.failures,
                self.reset_timeout.as_secs()
            );
        }
    }

    fn record_success(&mut self) {
        if self.failures > 0 {
            self.failures = 0;
            tracing::info!("Node RPC circuit breaker reset");
        }
    }

    fn check(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        match self.last_failure {
            Some(t) if t.elapsed() > self.reset_timeout => {
                tracing::info!("Node RPC circuit breaker half-open");
                self.is_open = false;
                self.failures = 0;
                Ok(())
            }
            _ => Err(anyhow!("node RPC circuit breaker is open")),
        }
    }
}

pub struct NodeRpcClient {
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
    client: Client<HttpConnector, Full<Bytes>>,
    circuit_breaker: Arc<RwLock<CircuitBreaker>>,
}

impl NodeRpcClient {
    pub fn new(url: &str, timeout: Option<Duration>) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build_http();
        tracing::info!("NodeRpcClient initialized: {}", url);
        Self {
            url: url.to_string(),
            timeout: timeout.unwrap_or(Duration::from_secs(30)),
            next_id: AtomicU64::new(1),
            client,
            circuit_breaker: Arc::new(RwLock::new(CircuitBreaker::new())),
        }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        metrics::inc_rpc_requests();
        let res = self.call_inner(method, params).await;
        if res.is_err() {
            metrics::inc_rpc_errors();
        }
        res
    }

    async fn call_inner(&self, method: &str, params: Value) -> Result<Value> {
        self.circuit_breaker.write().await.check()?;

        let payload = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        };
        let body = Full::new(Bytes::from(serde_json::to_vec(&payload)?));
        let req = Request::builder()
            .method(Method::POST)
            .uri(&self.url)
            .header("Content-Type", "application/json")
            .body(body)?;

        let response = match tokio::time::timeout(self.timeout, self.client.request(req)).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                self.circuit_breaker.write().await.record_failure();
                return Err(anyhow!("RPC connection failed: {}", e));
            }
            Err(_) => {
                self.circuit_breaker.write().await.record_failure();
                return Err(anyhow!("RPC request timeout ({})", method));
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.circuit_breaker.write().await.record_failure();
            return Err(anyhow!("RPC HTTP error: {}", status));
        }

        let body_bytes = response.into_body().collect().await?.to_bytes();
        let rpc_response: RpcResponse = serde_json::from_reader(body_bytes.reader())?;

        // Application errors do not trip the breaker.
        if let Some(error) = rpc_response.error {
            return Err(anyhow!("RPC error from {}: {}", method, error));
        }

        self.circuit_breaker.write().await.record_success();
        Ok(rpc_response.result.unwrap_or(Value::Null))
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| anyhow!("Bad {} result: {}", method, e))
    }

    /// Candidate for the current tip, as the node's consensus would emit it.
    pub async fn get_candidate(&self) -> Result<ChainCandidate> {
        self.call_as("getCandidate", json!([])).await
    }
}

#[async_trait]
impl Consensus for NodeRpcClient {
    async fn block_status(&self, hash: &Hash) -> Result<BlockStatus> {
        self.call_as("getBlockStatus", json!([hash])).await
    }

    async fn is_uncle_block(&self, hash: &Hash) -> Result<bool> {
        self.call_as("isUncleBlock", json!([hash])).await
    }

    async fn block_height(&self, hash: &Hash) -> Result<Option<u64>> {
        self.call_as("getBlockHeight", json!([hash])).await
    }

    async fn blocks_tip(&self) -> Result<ChainTip> {
        self.call_as("getBlocksTip", json!([])).await
    }

    async fn account(&self, address: &str) -> Result<Option<Account>> {
        self.call_as("getAccount", json!([address])).await
    }

    async fn put_block(&self, block: Block) -> Result<()> {
        let encoded = hex::encode(block.encode()?);
        self.call("putBlock", json!([encoded])).await.map(|_| ())
    }
}

#[async_trait]
impl WorldState for NodeRpcClient {
    async fn next(&self, request: NextStateRequest) -> Result<StateTransition> {
        self.call_as("nextState", serde_json::to_value(request)?).await
    }
}

#[async_trait]
impl Network for NodeRpcClient {
    async fn broadcast_blocks(&self, blocks: Vec<Block>) -> Result<()> {
        let encoded = blocks
            .iter()
            .map(|b| b.encode().map(hex::encode))
            .collect::<Result<Vec<_>, _>>()?;
        self.call("broadcastBlocks", json!([encoded])).await.map(|_| ())
    }

    async fn broadcast_txs(&self, txs: Vec<SignedTx>) -> Result<()> {
        self.call("broadcastTxs", json!([txs])).await.map(|_| ())
    }
}

#[async_trait]
impl TxPool for NodeRpcClient {
    async fn put_txs(&self, txs: Vec<SignedTx>) -> Result<Vec<SignedTx>> {
        self.call_as("putTxs", json!([txs])).await
    }

    async fn out_pending(&self, address: &str) -> Result<Vec<SignedTx>> {
        self.call_as("getOutPendingTxs", json!([address])).await
    }

    async fn remove_txs(&self, txs: Vec<SignedTx>) -> Result<()> {
        if txs.is_empty() {
            return Ok(());
        }
        self.call("removeTxs", json!([txs])).await.map(|_| ())
    }
}
