/// Node-side collaborators: the traits the pool consumes, plus the JSON-RPC
/// client, tip watcher and uncle-info lookup that implement them.

pub mod rpc_client;
pub mod tip_watcher;
pub mod uncle_info;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidepool_core::blockchain::block::{Block, BlockHeader, Hash};
use tidepool_core::blockchain::consensus::BlockStatus;
use tidepool_core::tx::SignedTx;

pub use rpc_client::NodeRpcClient;
pub use tip_watcher::TipWatcher;
pub use uncle_info::HttpUncleInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTip {
    pub hash: Hash,
    pub height: u64,
}

/// A stored block together with its height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub header: BlockHeader,
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncleCandidate {
    pub hash: Hash,
    pub height: u64,
    pub miner: String,
}

/// The chain moved: mine on top of `previous`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainCandidate {
    pub previous: ChainBlock,
    pub previous_hash: Hash,
    pub difficulty: f64,
    pub miner_reward: u64,
    #[serde(default)]
    pub uncles: Vec<UncleCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextStateRequest {
    pub parent_state_root: Hash,
    pub miner: String,
    pub miner_reward: u64,
    pub height: u64,
    pub uncles: Vec<UncleCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub current_state_root: Hash,
    pub valid_txs: Vec<SignedTx>,
    pub invalid_txs: Vec<SignedTx>,
}

#[async_trait]
pub trait Consensus: Send + Sync {
    async fn block_status(&self, hash: &Hash) -> Result<BlockStatus>;
    async fn is_uncle_block(&self, hash: &Hash) -> Result<bool>;
    /// `None` when the node does not know the block.
    async fn block_height(&self, hash: &Hash) -> Result<Option<u64>>;
    async fn blocks_tip(&self) -> Result<ChainTip>;
    /// `None` when the account does not exist on chain.
    async fn account(&self, address: &str) -> Result<Option<Account>>;
    async fn put_block(&self, block: Block) -> Result<()>;
}

#[async_trait]
pub trait WorldState: Send + Sync {
    async fn next(&self, request: NextStateRequest) -> Result<StateTransition>;
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn broadcast_blocks(&self, blocks: Vec<Block>) -> Result<()>;
    async fn broadcast_txs(&self, txs: Vec<SignedTx>) -> Result<()>;
}

#[async_trait]
pub trait TxPool: Send + Sync {
    /// Returns the transfers the pool accepted.
    async fn put_txs(&self, txs: Vec<SignedTx>) -> Result<Vec<SignedTx>>;
    /// Pending outgoing transfers from `address`, in nonce order.
    async fn out_pending(&self, address: &str) -> Result<Vec<SignedTx>>;
    async fn remove_txs(&self, txs: Vec<SignedTx>) -> Result<()>;
}

/// Depth of an uncle below its nephew; every failure maps to `None`.
#[async_trait]
pub trait UncleInfo: Send + Sync {
    async fn depth(&self, hash: &Hash) -> Option<u64>;
}

pub type CandidateHandler = Arc<dyn Fn(ChainCandidate) + Send + Sync>;

/// Node-side collaborators shared by the producer and the banker.
#[derive(Clone)]
pub struct NodeServices {
    pub consensus: Arc<dyn Consensus>,
    pub world_state: Arc<dyn WorldState>,
    pub network: Arc<dyn Network>,
    pub tx_pool: Arc<dyn TxPool>,
}

impl NodeServices {
    /// All four roles served by one node client.
    pub fn from_rpc(client: Arc<NodeRpcClient>) -> Self {
        Self {
            consensus: client.clone(),
            world_state: client.clone(),
            network: client.clone(),
            tx_pool: client,
        }
    }
}
