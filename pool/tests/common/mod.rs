#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tidepool::blockchain::{
    Account, ChainBlock, ChainCandidate, ChainTip, Consensus, Network, NextStateRequest, NodeServices,
    StateTransition, TxPool, UncleCandidate, UncleInfo, WorldState,
};
use tidepool::store::{MemoryStore, MinedBlock, MinedBlockStatus, NetworkSnapshot, PoolSnapshot, PoolStore};
use tidepool::workers::{Worker, WorkerUpdate};
use tidepool_core::blockchain::block::{Block, BlockHeader, Hash};
use tidepool_core::blockchain::consensus::{self, BlockStatus};
use tidepool_core::crypto::keys;
use tidepool_core::pow::{PowError, PowHasher, WORK_INPUT_LEN};
use tidepool_core::tx::SignedTx;

/// In-memory node: every collaborator role, with knobs and call logs.
#[derive(Default)]
pub struct FakeNode {
    pub statuses: Mutex<HashMap<Hash, BlockStatus>>,
    pub uncles: Mutex<HashSet<Hash>>,
    pub heights: Mutex<HashMap<Hash, u64>>,
    pub tip_height: AtomicU64,
    pub account: Mutex<Option<Account>>,
    pub out_pending: Mutex<Vec<SignedTx>>,
    pub next_valid: Mutex<Vec<SignedTx>>,
    pub next_invalid: Mutex<Vec<SignedTx>>,
    pub next_requests: Mutex<Vec<NextStateRequest>>,

    pub put_blocks: Mutex<Vec<Block>>,
    pub broadcast_blocks: Mutex<Vec<Block>>,
    pub pooled_txs: Mutex<Vec<SignedTx>>,
    pub broadcast_txs: Mutex<Vec<SignedTx>>,
    pub removed_txs: Mutex<Vec<SignedTx>>,

    pub fail_put_txs: AtomicBool,
    /// Delay added to every status lookup, in milliseconds.
    pub lookup_delay_ms: AtomicU64,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn services(self: &Arc<Self>) -> NodeServices {
        NodeServices {
            consensus: self.clone(),
            world_state: self.clone(),
            network: self.clone(),
            tx_pool: self.clone(),
        }
    }

    pub fn place(&self, hash: Hash, status: BlockStatus, uncle: bool, height: Option<u64>) {
        self.statuses.lock().unwrap().insert(hash, status);
        if uncle {
            self.uncles.lock().unwrap().insert(hash);
        }
        if let Some(h) = height {
            self.heights.lock().unwrap().insert(hash, h);
        }
    }

    pub fn set_tip(&self, height: u64) {
        self.tip_height.store(height, Ordering::SeqCst);
    }
}

#[async_trait]
impl Consensus for FakeNode {
    async fn block_status(&self, hash: &Hash) -> Result<BlockStatus> {
        let delay = self.lookup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(hash)
            .copied()
            .unwrap_or(BlockStatus::Nothing))
    }

    async fn is_uncle_block(&self, hash: &Hash) -> Result<bool> {
        Ok(self.uncles.lock().unwrap().contains(hash))
    }

    async fn block_height(&self, hash: &Hash) -> Result<Option<u64>> {
        Ok(self.heights.lock().unwrap().get(hash).copied())
    }

    async fn blocks_tip(&self) -> Result<ChainTip> {
        Ok(ChainTip {
            hash: Hash::default(),
            height: self.tip_height.load(Ordering::SeqCst),
        })
    }

    async fn account(&self, _address: &str) -> Result<Option<Account>> {
        Ok(*self.account.lock().unwrap())
    }

    async fn put_block(&self, block: Block) -> Result<()> {
        self.put_blocks.lock().unwrap().push(block);
        Ok(())
    }
}

#[async_trait]
impl WorldState for FakeNode {
    async fn next(&self, request: NextStateRequest) -> Result<StateTransition> {
        let root = Hash([request.height as u8; 32]);
        self.next_requests.lock().unwrap().push(request);
        Ok(StateTransition {
            current_state_root: root,
            valid_txs: self.next_valid.lock().unwrap().clone(),
            invalid_txs: self.next_invalid.lock().unwrap().clone(),
        })
    }
}

#[async_trait]
impl Network for FakeNode {
    async fn broadcast_blocks(&self, blocks: Vec<Block>) -> Result<()> {
        self.broadcast_blocks.lock().unwrap().extend(blocks);
        Ok(())
    }

    async fn broadcast_txs(&self, txs: Vec<SignedTx>) -> Result<()> {
        self.broadcast_txs.lock().unwrap().extend(txs);
        Ok(())
    }
}

#[async_trait]
impl TxPool for FakeNode {
    async fn put_txs(&self, txs: Vec<SignedTx>) -> Result<Vec<SignedTx>> {
        if self.fail_put_txs.load(Ordering::SeqCst) {
            return Err(anyhow!("txpool unavailable"));
        }
        self.pooled_txs.lock().unwrap().extend(txs.clone());
        self.out_pending.lock().unwrap().extend(txs.clone());
        Ok(txs)
    }

    async fn out_pending(&self, _address: &str) -> Result<Vec<SignedTx>> {
        Ok(self.out_pending.lock().unwrap().clone())
    }

    async fn remove_txs(&self, txs: Vec<SignedTx>) -> Result<()> {
        self.removed_txs.lock().unwrap().extend(txs);
        Ok(())
    }
}

/// Uncle depth lookup with a fixed answer.
pub struct FixedUncleInfo(pub Option<u64>);

#[async_trait]
impl UncleInfo for FixedUncleInfo {
    async fn depth(&self, _hash: &Hash) -> Option<u64> {
        self.0
    }
}

/// Nonce 0 solves any block, 1 solves nothing, 2 is a share at block
/// difficulty 1e-5 but not a block; every other nonce fails to hash.
pub struct ScriptedHasher;

impl PowHasher for ScriptedHasher {
    fn hash(&self, input: &[u8; WORK_INPUT_LEN]) -> Result<[u8; 32], PowError> {
        let nonce = u64::from_le_bytes(input[64..].try_into().unwrap());
        match nonce {
            0 => Ok([0u8; 32]),
            1 => Ok([0xff; 32]),
            2 => Ok(consensus::target_from_difficulty(1e-3)),
            _ => Err(PowError::Hasher("scripted failure".into())),
        }
    }
}

/// Memory store whose worker writes each take `delay`.
pub struct SlowStore {
    pub inner: MemoryStore,
    pub delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            delay,
        })
    }
}

#[async_trait]
impl PoolStore for SlowStore {
    async fn reset_workers(&self) -> Result<()> {
        self.inner.reset_workers().await
    }
    async fn upsert_worker(&self, worker: &Worker) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert_worker(worker).await
    }
    async fn update_worker(&self, id: &str, update: &WorkerUpdate) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_worker(id, update).await
    }
    async fn remove_worker(&self, id: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.remove_worker(id).await
    }
    async fn workers(&self) -> Result<Vec<Worker>> {
        self.inner.workers().await
    }
    async fn add_mined_block(&self, block: &MinedBlock) -> Result<()> {
        self.inner.add_mined_block(block).await
    }
    async fn mined_blocks(&self) -> Result<Vec<MinedBlock>> {
        self.inner.mined_blocks().await
    }
    async fn update_mined_block_status(&self, hash: &str, status: MinedBlockStatus) -> Result<()> {
        self.inner.update_mined_block_status(hash, status).await
    }
    async fn delete_mined_block(&self, hash: &str) -> Result<()> {
        self.inner.delete_mined_block(hash).await
    }
    async fn add_history(&self, block: &MinedBlock) -> Result<()> {
        self.inner.add_history(block).await
    }
    async fn history(&self, limit: usize) -> Result<Vec<MinedBlock>> {
        self.inner.history(limit).await
    }
    async fn pool_snapshot(&self) -> Result<Option<PoolSnapshot>> {
        self.inner.pool_snapshot().await
    }
    async fn replace_pool_snapshot(&self, snapshot: &PoolSnapshot) -> Result<()> {
        self.inner.replace_pool_snapshot(snapshot).await
    }
    async fn network_snapshot(&self) -> Result<Option<NetworkSnapshot>> {
        self.inner.network_snapshot().await
    }
    async fn replace_network_snapshot(&self, snapshot: &NetworkSnapshot) -> Result<()> {
        self.inner.replace_network_snapshot(snapshot).await
    }
}

pub fn address(seed: u8) -> String {
    keys::address_from_public_key(&[seed; 32])
}

pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

pub fn header(difficulty: f64, timestamp: u64) -> BlockHeader {
    BlockHeader {
        previous_hash: vec![Hash([5u8; 32])],
        merkle_root: Hash::default(),
        state_root: Hash([6u8; 32]),
        difficulty,
        timestamp,
        nonce: None,
        miner: address(200),
    }
}

pub fn block(difficulty: f64) -> Block {
    Block {
        header: header(difficulty, now_millis()),
        txs: vec![],
    }
}

pub fn candidate(tip: u8, parent_timestamp: u64, uncles: &[u8]) -> ChainCandidate {
    let mut parent = header(1e-4, parent_timestamp);
    parent.nonce = Some(77);
    ChainCandidate {
        previous: ChainBlock {
            header: parent,
            height: 99,
        },
        previous_hash: Hash([tip; 32]),
        difficulty: 1e-4,
        miner_reward: 12_000_000_000,
        uncles: uncles
            .iter()
            .map(|&u| UncleCandidate {
                hash: Hash([u; 32]),
                height: 98,
                miner: address(u),
            })
            .collect(),
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
