//! Candidate producer: turns chain-tip events into mining candidates on the
//! put-work topic, and turns solved blocks coming back on submit-work into
//! network broadcasts, pool statistics and pending mined-block records.

pub mod epoch;
pub mod stats;

use anyhow::Result;
use std::sync::Arc;
use tidepool_core::blockchain::block::{Block, BlockHeader, Hash};
use tidepool_core::blockchain::consensus;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::blockchain::{ChainCandidate, NextStateRequest, NodeServices};
use crate::channel::{self, PutWork, SubmitWork, Topic, WorkChannel};
use crate::config::Config;
use crate::metrics::prometheus as metrics;
use crate::store::{MinedBlock, MinedBlockStatus, NetworkSnapshot, PoolSnapshot, PoolStore};
use crate::workers::WorkerUpdate;

pub use epoch::{EpochSlot, MiningEpoch};
pub use stats::{sma, ShareSnapshot};

/// Minimum gap between a candidate and its parent, in milliseconds.
const MIN_BLOCK_SPACING_MS: u64 = 50;

#[derive(Debug, Default)]
struct NetworkStats {
    /// Candidates seen since the pool last found a block.
    block_gap: u64,
    network_hashrate: f64,
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub struct CandidateProducer {
    config: Arc<Config>,
    node: NodeServices,
    channel: Arc<dyn WorkChannel>,
    store: Arc<dyn PoolStore>,
    /// Held while a candidate is built and published.
    epoch: Mutex<EpochSlot>,
    stats: Mutex<NetworkStats>,
}

impl CandidateProducer {
    pub fn new(
        config: Arc<Config>,
        node: NodeServices,
        channel: Arc<dyn WorkChannel>,
        store: Arc<dyn PoolStore>,
    ) -> Self {
        Self {
            config,
            node,
            channel,
            store,
            epoch: Mutex::new(EpochSlot::default()),
            stats: Mutex::new(NetworkStats::default()),
        }
    }

    /// Listen for solved blocks on submit-work.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut rx = self.channel.subscribe(Topic::SubmitWork).await?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let decoded = channel::decode::<SubmitWork>(&payload)
                    .and_then(|msg| Ok((msg.block()?, msg.miner_reward)));
                match decoded {
                    Ok((block, reward)) => this.on_submitted_block(block, reward).await,
                    Err(e) => tracing::error!("Undecodable submit-work message: {}", e),
                }
            }
        }))
    }

    /// Queue feeding [`Self::on_chain_candidate`] one event at a time, so the
    /// most recently reported tip is always the one installed last.
    pub fn spawn_candidate_loop(self: &Arc<Self>) -> (mpsc::UnboundedSender<ChainCandidate>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ChainCandidate>();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(candidate) = rx.recv().await {
                this.on_chain_candidate(candidate).await;
            }
        });
        (tx, handle)
    }

    fn is_stale(&self, candidate: &ChainCandidate) -> bool {
        let age = now_millis().saturating_sub(candidate.previous.header.timestamp);
        !self.config.bootstrap && age > self.config.stale_tip().as_millis() as u64
    }

    pub async fn on_chain_candidate(self: &Arc<Self>, candidate: ChainCandidate) {
        if self.is_stale(&candidate) {
            tracing::error!("Last block is more than a day old, waiting for synchronization prior to mining");
            return;
        }
        tracing::info!(
            "New tip {} at height {}, building candidate",
            candidate.previous_hash,
            candidate.previous.height
        );
        self.update_network_info(candidate.difficulty, candidate.miner_reward).await;

        let token = {
            let mut slot = self.epoch.lock().await;
            let next = MiningEpoch::new(candidate.previous_hash);
            let token = next.token();
            slot.replace(next);
            self.publish_candidate(&candidate).await;
            token
        };
        self.spawn_reissue(candidate, token);
    }

    /// Rebuild and republish the same candidate with a fresh timestamp until
    /// the epoch is cancelled.
    fn spawn_reissue(self: &Arc<Self>, candidate: ChainCandidate, token: CancellationToken) {
        let this = Arc::clone(self);
        let period = self.config.reissue_interval();
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let _slot = this.epoch.lock().await;
                        if token.is_cancelled() {
                            break;
                        }
                        this.publish_candidate(&candidate).await;
                    }
                }
            }
            tracing::debug!("Reissue for {} stopped", candidate.previous_hash);
        });
    }

    async fn update_network_info(&self, difficulty: f64, miner_reward: u64) {
        let snapshot = {
            let mut stats = self.stats.lock().await;
            stats.block_gap += 1;
            stats.network_hashrate = consensus::network_hashrate(difficulty);
            NetworkSnapshot {
                fee: self.config.pool_fee,
                pool_diff: consensus::pool_difficulty(difficulty, self.config.pool_solution_space),
                reward: miner_reward,
                hashrate: stats.network_hashrate,
                block_gap: stats.block_gap,
                tick: chrono::Utc::now().timestamp_millis(),
            }
        };
        if let Err(e) = self.store.replace_network_snapshot(&snapshot).await {
            tracing::warn!("Failed to store network snapshot: {}", e);
        }
    }

    async fn publish_candidate(&self, candidate: &ChainCandidate) {
        let block = match self.build_candidate(candidate).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Failed to build candidate on {}: {}", candidate.previous_hash, e);
                return;
            }
        };
        match PutWork::new(&block, &block.header.pre_hash(), candidate.miner_reward) {
            Ok(msg) => {
                channel::publish_message(self.channel.as_ref(), Topic::PutWork, &msg).await;
                metrics::inc_candidates_built();
            }
            Err(e) => tracing::error!("Failed to encode candidate: {}", e),
        }
    }

    /// Assemble an unsolved block on top of `candidate.previous`, referencing
    /// every uncle as an extra parent.
    pub async fn build_candidate(&self, candidate: &ChainCandidate) -> Result<Block> {
        let previous = &candidate.previous;
        let transition = self
            .node
            .world_state
            .next(NextStateRequest {
                parent_state_root: previous.header.state_root,
                miner: self.config.pool_address.clone(),
                miner_reward: candidate.miner_reward,
                height: previous.height + 1,
                uncles: candidate.uncles.clone(),
            })
            .await?;

        if !transition.invalid_txs.is_empty() {
            let count = transition.invalid_txs.len();
            if let Err(e) = self.node.tx_pool.remove_txs(transition.invalid_txs).await {
                tracing::warn!("Failed to drop {} invalid transfers: {}", count, e);
            }
        }

        let mut parents: Vec<Hash> = Vec::with_capacity(1 + candidate.uncles.len());
        parents.push(candidate.previous_hash);
        parents.extend(candidate.uncles.iter().map(|u| u.hash));
        if parents.len() > 1 {
            tracing::debug!("Mining next block with {} uncle(s)", parents.len() - 1);
        }

        let txs = transition.valid_txs;
        Ok(Block {
            header: BlockHeader {
                previous_hash: parents,
                merkle_root: Block::calculate_merkle_root(&txs),
                state_root: transition.current_state_root,
                difficulty: candidate.difficulty,
                timestamp: now_millis().max(previous.header.timestamp + MIN_BLOCK_SPACING_MS),
                nonce: None,
                miner: self.config.pool_address.clone(),
            },
            txs,
        })
    }

    /// A worker solved a candidate: account for it and hand it to the node.
    /// Proof of work is the node's to verify.
    pub async fn on_submitted_block(&self, block: Block, miner_reward: u64) {
        tracing::info!("Received solved block {}", block.hash());
        let (_, broadcast, put) = tokio::join!(
            self.update_statistics(&block, miner_reward),
            self.node.network.broadcast_blocks(vec![block.clone()]),
            self.node.consensus.put_block(block.clone()),
        );
        if let Err(e) = broadcast {
            tracing::warn!("Block broadcast failed: {}", e);
        }
        if let Err(e) = put {
            tracing::warn!("Node rejected block {}: {}", block.hash(), e);
        }
    }

    /// Close the accounting round: smooth the pool hashrate, split it across
    /// workers by share, zero their shares and record the pending mined block.
    pub async fn update_statistics(&self, block: &Block, miner_reward: u64) {
        let instant = {
            let stats = self.stats.lock().await;
            if stats.block_gap == 0 {
                0.0
            } else {
                stats.network_hashrate / stats.block_gap as f64
            }
        };
        let previous = match self.store.pool_snapshot().await {
            Ok(snap) => snap.map(|s| s.hashrate).unwrap_or(0.0),
            Err(e) => {
                tracing::warn!("Failed to read pool snapshot: {}", e);
                0.0
            }
        };
        let hashrate = sma(instant, previous, self.config.hashrate_sma_window);
        let tick = chrono::Utc::now().timestamp_millis();
        metrics::set_pool_hashrate(hashrate);
        if let Err(e) = self.store.replace_pool_snapshot(&PoolSnapshot { hashrate, tick }).await {
            tracing::warn!("Failed to store pool snapshot: {}", e);
        }

        let workers = match self.store.workers().await {
            Ok(w) => w,
            Err(e) => {
                tracing::error!("Failed to read workers, block recorded without shares: {}", e);
                Vec::new()
            }
        };
        let snapshot = ShareSnapshot::from_workers(&workers);
        for worker in &workers {
            let update = WorkerUpdate {
                shares: Some(0),
                hashrate: Some(snapshot.hashrate_of(worker.shares, hashrate)),
                tick: None,
            };
            if let Err(e) = self.store.update_worker(&worker.id, &update).await {
                tracing::warn!("Failed to update worker {}: {}", worker.name, e);
            }
        }

        let mined = MinedBlock {
            hash: block.hash().to_hex(),
            status: MinedBlockStatus::Pending,
            prev_hash: block
                .header
                .primary_parent()
                .map(Hash::to_hex)
                .unwrap_or_default(),
            timestamp: tick,
            addresses: snapshot.addresses,
            shares: snapshot.shares,
            total_shares: snapshot.total_shares,
            reward: miner_reward,
            paid: false,
        };
        if let Err(e) = self.store.add_mined_block(&mined).await {
            tracing::error!("Failed to record mined block {}: {}", mined.hash, e);
        }
        self.stats.lock().await.block_gap = 0;
    }

    /// Tip of the live epoch, if any.
    pub async fn current_tip(&self) -> Option<Hash> {
        self.epoch.lock().await.current().map(MiningEpoch::tip)
    }

    pub async fn block_gap(&self) -> u64 {
        self.stats.lock().await.block_gap
    }
}
