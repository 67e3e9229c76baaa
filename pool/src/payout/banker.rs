use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tidepool_core::blockchain::block::Hash;
use tidepool_core::blockchain::consensus::{self, BlockStatus};
use tidepool_core::tx::UnsignedTx;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;

use super::distribution::{self, PayoutPlan};
use super::wallet::TxSigner;
use crate::blockchain::{NodeServices, UncleInfo};
use crate::config::Config;
use crate::error::DistributionError;
use crate::metrics::prometheus as metrics;
use crate::store::{MinedBlock, MinedBlockStatus, PoolStore};

/// What one sweep did with one pending block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Not yet past the confirmation depth; status label refreshed.
    Waiting,
    /// Paid and archived.
    Paid,
    /// Matured off-chain; archived unpaid.
    Orphaned,
    /// Inconsistent share record; left pending.
    Held,
    /// Payout failed part-way; archived unpaid.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub waiting: usize,
    pub paid: usize,
    pub orphaned: usize,
    pub held: usize,
    pub failed: usize,
    /// Blocks skipped because a chain lookup failed.
    pub errors: usize,
}

impl SweepSummary {
    fn record(&mut self, outcome: BlockOutcome) {
        match outcome {
            BlockOutcome::Waiting => self.waiting += 1,
            BlockOutcome::Paid => self.paid += 1,
            BlockOutcome::Orphaned => self.orphaned += 1,
            BlockOutcome::Held => self.held += 1,
            BlockOutcome::Failed => self.failed += 1,
        }
    }
}

/// Periodically settles mined blocks: classifies each against the chain,
/// waits out the confirmation depth, then pays contributors by share.
pub struct Banker {
    config: Arc<Config>,
    node: NodeServices,
    store: Arc<dyn PoolStore>,
    uncle_info: Arc<dyn UncleInfo>,
    signer: Arc<dyn TxSigner>,
    pool_fee: Decimal,
    miner_fee: Decimal,
    /// Held for the whole sweep; a tick that finds it taken is skipped.
    sweeping: Mutex<()>,
}

impl Banker {
    pub fn new(
        config: Arc<Config>,
        node: NodeServices,
        store: Arc<dyn PoolStore>,
        uncle_info: Arc<dyn UncleInfo>,
        signer: Arc<dyn TxSigner>,
    ) -> Self {
        let pool_fee = distribution::to_decimal(config.pool_fee);
        let miner_fee = distribution::to_decimal(config.miner_fee);
        Self {
            config,
            node,
            store,
            uncle_info,
            signer,
            pool_fee,
            miner_fee,
            sweeping: Mutex::new(()),
        }
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.banker_interval();
        tracing::info!("Banker sweeping every {:?} from {}", period, self.signer.address());
        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                let banker = Arc::clone(&self);
                // Overlapping ticks bounce off the sweep lock.
                tokio::spawn(async move {
                    banker.sweep().await;
                });
            }
        })
    }

    /// One pass over every pending mined block. Returns `None` when another
    /// sweep is still running.
    pub async fn sweep(&self) -> Option<SweepSummary> {
        let Ok(_guard) = self.sweeping.try_lock() else {
            tracing::debug!("Previous payout sweep still running, skipping");
            return None;
        };
        metrics::inc_payout_sweeps();

        let blocks = match self.store.mined_blocks().await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Failed to load mined blocks: {}", e);
                return Some(SweepSummary::default());
            }
        };

        let mut summary = SweepSummary::default();
        for block in blocks {
            match self.settle(&block).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!("Could not settle mined block {}: {}", block.hash, e);
                }
            }
        }
        if summary != SweepSummary::default() {
            tracing::info!("Payout sweep: {:?}", summary);
        }
        Some(summary)
    }

    async fn settle(&self, block: &MinedBlock) -> Result<BlockOutcome> {
        let hash = Hash::from_hex(&block.hash)?;
        let consensus = &self.node.consensus;

        let status = if consensus.block_status(&hash).await? == BlockStatus::MainChain {
            MinedBlockStatus::MainChain
        } else if consensus.is_uncle_block(&hash).await? {
            MinedBlockStatus::Uncle
        } else {
            MinedBlockStatus::Pending
        };

        let height = consensus.block_height(&hash).await?;
        let tip = consensus.blocks_tip().await?;
        let matured = height.is_some_and(|h| h + self.config.confirmation_depth < tip.height);
        if !matured {
            self.store.update_mined_block_status(&block.hash, status).await?;
            return Ok(BlockOutcome::Waiting);
        }

        let reward = match status {
            MinedBlockStatus::MainChain => block.reward,
            MinedBlockStatus::Uncle => {
                let depth = match self.uncle_info.depth(&hash).await {
                    Some(d) => d,
                    None => {
                        tracing::warn!(
                            "No uncle info for {}, assuming depth {}",
                            block.hash,
                            self.config.uncle_fallback_depth
                        );
                        self.config.uncle_fallback_depth
                    }
                };
                consensus::uncle_reward(block.reward, depth)
            }
            _ => {
                tracing::info!("Mined block {} orphaned at height {:?}", block.hash, height);
                self.archive(block, MinedBlockStatus::Orphan, false).await?;
                return Ok(BlockOutcome::Orphaned);
            }
        };

        match self.distribute(block, reward).await {
            Ok(sent) => {
                tracing::info!("Successful distribute block {} ({} transfers)", block.hash, sent);
                self.archive(block, status, true).await?;
                Ok(BlockOutcome::Paid)
            }
            Err(DistributionError::Integrity { hash, reason }) => {
                tracing::error!("Invalid mined block {}: {}", hash, reason);
                self.store.update_mined_block_status(&block.hash, status).await?;
                Ok(BlockOutcome::Held)
            }
            Err(e) => {
                tracing::error!("payout failed for block {}: {}", block.hash, e);
                metrics::inc_payouts_failed();
                self.archive(block, status, false).await?;
                Ok(BlockOutcome::Failed)
            }
        }
    }

    async fn archive(&self, block: &MinedBlock, status: MinedBlockStatus, paid: bool) -> Result<()> {
        let mut record = block.clone();
        record.status = status;
        record.paid = paid;
        self.store.add_history(&record).await?;
        self.store.delete_mined_block(&record.hash).await?;
        metrics::inc_mined_blocks_archived(status.as_str());
        Ok(())
    }

    /// Pay every contributor of `block` their cut of `reward` base units.
    /// Returns the number of transfers sent.
    pub async fn distribute(&self, block: &MinedBlock, reward: u64) -> Result<usize, DistributionError> {
        let PayoutPlan { salaries, allocations, .. } =
            distribution::plan(block, reward, self.pool_fee, self.miner_fee)?;
        tracing::debug!("Distributing {} coins of block {}", salaries, block.hash);

        let fee = distribution::coins_to_units(self.miner_fee);
        let mut sent = 0usize;
        for alloc in allocations {
            let Some(amount) = alloc.net_units() else {
                tracing::warn!(
                    "Skipping payout of {} to {}: nothing left after fee",
                    alloc.gross,
                    alloc.address
                );
                continue;
            };
            let nonce = self.next_nonce().await?;
            let signed = self
                .signer
                .sign(UnsignedTx {
                    from: self.signer.address().to_string(),
                    to: alloc.address.clone(),
                    amount,
                    fee,
                    nonce,
                })
                .map_err(|e| DistributionError::Signing(e.to_string()))?;
            let tx_hash = signed.hash();

            let accepted = self.node.tx_pool.put_txs(vec![signed]).await?;
            self.node.network.broadcast_txs(accepted).await?;
            tracing::warn!("sending {} to {} ({})", alloc.net, alloc.address, tx_hash);
            sent += 1;
        }
        metrics::inc_payouts_sent(sent as u64);
        Ok(sent)
    }

    /// Smallest nonce used neither on chain nor in the outgoing pool. A
    /// transfer the pool evicts frees its nonce again.
    pub async fn next_nonce(&self) -> Result<u64> {
        let address = self.signer.address();
        let mut next = match self.node.consensus.account(address).await? {
            Some(account) => account.nonce + 1,
            None => 0,
        };
        if let Some(last) = self.node.tx_pool.out_pending(address).await?.last() {
            next = next.max(last.nonce() + 1);
        }
        Ok(next)
    }
}
