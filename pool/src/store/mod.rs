//! Durable pool state: workers, mined blocks awaiting payout, payout history
//! and the latest pool/network snapshots.

pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::workers::{Worker, WorkerUpdate};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MinedBlockStatus {
    Pending,
    MainChain,
    Uncle,
    Orphan,
}

impl MinedBlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MinedBlockStatus::Pending => "pending",
            MinedBlockStatus::MainChain => "main-chain",
            MinedBlockStatus::Uncle => "uncle",
            MinedBlockStatus::Orphan => "orphan",
        }
    }
}

/// A block found by the pool, with the share snapshot taken when it was found.
///
/// `addresses[i]` contributed `shares[i]`; addresses are unique and
/// `sum(shares) == total_shares`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinedBlock {
    pub hash: String,
    pub status: MinedBlockStatus,
    pub prev_hash: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub addresses: Vec<String>,
    pub shares: Vec<u64>,
    pub total_shares: u64,
    /// Base units.
    pub reward: u64,
    pub paid: bool,
}

impl MinedBlock {
    /// Describes the first structural inconsistency, if any.
    pub fn integrity_problem(&self) -> Option<String> {
        if self.addresses.len() != self.shares.len() {
            return Some(format!(
                "{} addresses but {} share counts",
                self.addresses.len(),
                self.shares.len()
            ));
        }
        let sum: u64 = self.shares.iter().sum();
        if sum != self.total_shares {
            return Some(format!("shares sum to {} but total is {}", sum, self.total_shares));
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub hashrate: f64,
    pub tick: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    /// Pool fee fraction.
    pub fee: f64,
    pub pool_diff: f64,
    pub reward: u64,
    pub hashrate: f64,
    pub block_gap: u64,
    pub tick: i64,
}

#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Drop every persisted worker (stale rows from a previous process).
    async fn reset_workers(&self) -> Result<()>;
    async fn upsert_worker(&self, worker: &Worker) -> Result<()>;
    /// Apply `update` to an existing worker; unknown ids are ignored.
    async fn update_worker(&self, id: &str, update: &WorkerUpdate) -> Result<()>;
    async fn remove_worker(&self, id: &str) -> Result<()>;
    async fn workers(&self) -> Result<Vec<Worker>>;

    async fn add_mined_block(&self, block: &MinedBlock) -> Result<()>;
    /// Pending mined blocks, oldest first.
    async fn mined_blocks(&self) -> Result<Vec<MinedBlock>>;
    async fn update_mined_block_status(&self, hash: &str, status: MinedBlockStatus) -> Result<()>;
    async fn delete_mined_block(&self, hash: &str) -> Result<()>;
    async fn add_history(&self, block: &MinedBlock) -> Result<()>;
    /// Archived blocks, most recent first.
    async fn history(&self, limit: usize) -> Result<Vec<MinedBlock>>;

    async fn pool_snapshot(&self) -> Result<Option<PoolSnapshot>>;
    async fn replace_pool_snapshot(&self, snapshot: &PoolSnapshot) -> Result<()>;
    async fn network_snapshot(&self) -> Result<Option<NetworkSnapshot>>;
    async fn replace_network_snapshot(&self, snapshot: &NetworkSnapshot) -> Result<()>;
}
