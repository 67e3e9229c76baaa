//! Synthetic work for benchmarking miners without a node: a random block is
//! fed straight to the coordinator on a fixed interval.

use rand::{Rng, RngCore};
use std::sync::Arc;
use std::time::Duration;
use tidepool_core::blockchain::block::{Block, BlockHeader, Hash};
use tokio::task::JoinHandle;

use super::coordinator::StratumCoordinator;

pub const TEST_MINER_REWARD: u64 = 12_000_000_000;

/// Uniform in `1..=max`.
fn random_index(max: u32) -> u32 {
    rand::thread_rng().gen_range(1..=max)
}

fn random_hash() -> Hash {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Hash(bytes)
}

/// Block with random roots and a difficulty between 1x and 9x `base_difficulty`.
pub fn test_block(base_difficulty: f64) -> Block {
    Block {
        header: BlockHeader {
            previous_hash: vec![random_hash()],
            merkle_root: random_hash(),
            state_root: random_hash(),
            difficulty: (random_index(9) as f64 * base_difficulty).min(1.0),
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
            nonce: None,
            miner: String::new(),
        },
        txs: vec![],
    }
}

pub struct TestWorkSource {
    coordinator: Arc<StratumCoordinator>,
    base_difficulty: f64,
    interval: Duration,
}

impl TestWorkSource {
    pub fn new(coordinator: Arc<StratumCoordinator>, base_difficulty: f64, interval: Duration) -> Self {
        Self {
            coordinator,
            base_difficulty,
            interval,
        }
    }

    pub async fn emit(&self) -> u32 {
        let block = test_block(self.base_difficulty);
        let pre_hash = block.header.pre_hash();
        tracing::debug!("Test work at difficulty {:e}", block.header.difficulty);
        self.coordinator.on_put_work(block, pre_hash, TEST_MINER_REWARD).await
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Test work source every {:?}", self.interval);
            let mut interval = tokio::time::interval(self.interval);
            loop {
                interval.tick().await;
                self.emit().await;
            }
        })
    }
}
