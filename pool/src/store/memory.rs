use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{MinedBlock, MinedBlockStatus, NetworkSnapshot, PoolSnapshot, PoolStore};
use crate::workers::{Worker, WorkerUpdate};

/// Process-local store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryStore {
    workers: RwLock<HashMap<String, Worker>>,
    mined: RwLock<Vec<MinedBlock>>,
    history: RwLock<Vec<MinedBlock>>,
    pool: RwLock<Option<PoolSnapshot>>,
    network: RwLock<Option<NetworkSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PoolStore for MemoryStore {
    async fn reset_workers(&self) -> Result<()> {
        self.workers.write().await.clear();
        Ok(())
    }

    async fn upsert_worker(&self, worker: &Worker) -> Result<()> {
        self.workers.write().await.insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn update_worker(&self, id: &str, update: &WorkerUpdate) -> Result<()> {
        if let Some(w) = self.workers.write().await.get_mut(id) {
            w.apply(update);
        }
        Ok(())
    }

    async fn remove_worker(&self, id: &str) -> Result<()> {
        self.workers.write().await.remove(id);
        Ok(())
    }

    async fn workers(&self) -> Result<Vec<Worker>> {
        let mut all: Vec<Worker> = self.workers.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn add_mined_block(&self, block: &MinedBlock) -> Result<()> {
        self.mined.write().await.push(block.clone());
        Ok(())
    }

    async fn mined_blocks(&self) -> Result<Vec<MinedBlock>> {
        Ok(self.mined.read().await.clone())
    }

    async fn update_mined_block_status(&self, hash: &str, status: MinedBlockStatus) -> Result<()> {
        for b in self.mined.write().await.iter_mut().filter(|b| b.hash == hash) {
            b.status = status;
        }
        Ok(())
    }

    async fn delete_mined_block(&self, hash: &str) -> Result<()> {
        self.mined.write().await.retain(|b| b.hash != hash);
        Ok(())
    }

    async fn add_history(&self, block: &MinedBlock) -> Result<()> {
        self.history.write().await.push(block.clone());
        Ok(())
    }

    async fn history(&self, limit: usize) -> Result<Vec<MinedBlock>> {
        Ok(self.history.read().await.iter().rev().take(limit).cloned().collect())
    }

    async fn pool_snapshot(&self) -> Result<Option<PoolSnapshot>> {
        Ok(self.pool.read().await.clone())
    }

    async fn replace_pool_snapshot(&self, snapshot: &PoolSnapshot) -> Result<()> {
        *self.pool.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn network_snapshot(&self) -> Result<Option<NetworkSnapshot>> {
        Ok(self.network.read().await.clone())
    }

    async fn replace_network_snapshot(&self, snapshot: &NetworkSnapshot) -> Result<()> {
        *self.network.write().await = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str) -> Worker {
        Worker {
            id: id.into(),
            address: "tide1a".into(),
            name: format!("x_{id}"),
            ip: "127.0.0.1".into(),
            shares: 0,
            hashrate: 0.0,
            tick: 0,
        }
    }

    #[tokio::test]
    async fn test_update_ignores_unknown_worker() {
        let store = MemoryStore::new();
        store.update_worker("ghost", &WorkerUpdate::shares(3)).await.unwrap();
        assert!(store.workers().await.unwrap().is_empty());

        store.upsert_worker(&worker("w1")).await.unwrap();
        store.update_worker("w1", &WorkerUpdate::shares(3)).await.unwrap();
        assert_eq!(store.workers().await.unwrap()[0].shares, 3);
    }

    #[tokio::test]
    async fn test_reset_workers() {
        let store = MemoryStore::new();
        store.upsert_worker(&worker("w1")).await.unwrap();
        store.upsert_worker(&worker("w2")).await.unwrap();
        store.remove_worker("w1").await.unwrap();
        assert_eq!(store.workers().await.unwrap().len(), 1);
        store.reset_workers().await.unwrap();
        assert!(store.workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mined_block_lifecycle() {
        let store = MemoryStore::new();
        let block = MinedBlock {
            hash: "h1".into(),
            status: MinedBlockStatus::Pending,
            prev_hash: "p".into(),
            timestamp: 1,
            addresses: vec!["a".into()],
            shares: vec![1],
            total_shares: 1,
            reward: 10,
            paid: false,
        };
        store.add_mined_block(&block).await.unwrap();
        store.update_mined_block_status("h1", MinedBlockStatus::Uncle).await.unwrap();
        assert_eq!(store.mined_blocks().await.unwrap()[0].status, MinedBlockStatus::Uncle);

        store.delete_mined_block("h1").await.unwrap();
        store.add_history(&block).await.unwrap();
        assert!(store.mined_blocks().await.unwrap().is_empty());
        assert_eq!(store.history(10).await.unwrap().len(), 1);
    }
}
