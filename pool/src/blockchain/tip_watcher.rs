/// Chain-tip watcher
///
/// Polls the node for the current mining candidate and hands it to the
/// registered handler whenever the tip hash or its set of uncles changes.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tidepool_core::blockchain::block::Hash;
use tokio::task::JoinHandle;
use tokio::time;

use super::{CandidateHandler, ChainCandidate, NodeRpcClient};

#[async_trait]
pub trait CandidateFeed: Send + Sync {
    async fn current_candidate(&self) -> Result<ChainCandidate>;
}

#[async_trait]
impl CandidateFeed for NodeRpcClient {
    async fn current_candidate(&self) -> Result<ChainCandidate> {
        self.get_candidate().await
    }
}

/// Identity of a candidate for change detection: the tip plus its uncle set.
fn candidate_key(candidate: &ChainCandidate) -> (Hash, Vec<Hash>) {
    let mut uncles: Vec<Hash> = candidate.uncles.iter().map(|u| u.hash).collect();
    uncles.sort();
    (candidate.previous_hash, uncles)
}

pub struct TipWatcher {
    feed: Arc<dyn CandidateFeed>,
    poll_interval: Duration,
    on_candidate: Option<CandidateHandler>,
}

impl TipWatcher {
    pub fn new(feed: Arc<dyn CandidateFeed>, poll_interval: Duration) -> Self {
        Self {
            feed,
            poll_interval,
            on_candidate: None,
        }
    }

    /// Register the candidate handler. Replaces any earlier one.
    pub fn on_candidate<F>(&mut self, handler: F)
    where
        F: Fn(ChainCandidate) + Send + Sync + 'static,
    {
        self.on_candidate = Some(Arc::new(handler));
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            let mut last: Option<(Hash, Vec<Hash>)> = None;

            loop {
                interval.tick().await;
                match self.feed.current_candidate().await {
                    Ok(candidate) => {
                        let key = candidate_key(&candidate);
                        if last.as_ref() == Some(&key) {
                            continue;
                        }
                        if last.as_ref().is_some_and(|(tip, _)| *tip == key.0) {
                            tracing::info!(
                                "Uncles of tip {} changed ({} now)",
                                candidate.previous_hash,
                                key.1.len()
                            );
                        } else {
                            tracing::info!(
                                "New tip {} at height {}",
                                candidate.previous_hash,
                                candidate.previous.height
                            );
                        }
                        last = Some(key);
                        if let Some(handler) = &self.on_candidate {
                            handler(candidate);
                        }
                    }
                    Err(e) => tracing::warn!("Failed to fetch candidate: {}", e),
                }
            }
        })
    }
}
