use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};

use super::{Topic, WorkChannel, WorkReceiver};

const TOPIC_CAPACITY: usize = 256;

/// In-process channel: one broadcast sender per topic.
pub struct MemoryChannel {
    topics: HashMap<Topic, broadcast::Sender<Vec<u8>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        let topics = [Topic::PutWork, Topic::SubmitWork]
            .into_iter()
            .map(|t| (t, broadcast::channel(TOPIC_CAPACITY).0))
            .collect();
        Self { topics }
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkChannel for MemoryChannel {
    async fn publish(&self, topic: Topic, payload: Vec<u8>) {
        if let Some(tx) = self.topics.get(&topic) {
            // No subscribers is not an error for a fanout.
            let _ = tx.send(payload);
        }
    }

    async fn subscribe(&self, topic: Topic) -> Result<WorkReceiver> {
        let mut rx = self
            .topics
            .get(&topic)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| anyhow::anyhow!("unknown topic {}", topic.name()))?;
        let (out, receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if out.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("{} subscriber dropped {} messages", topic.name(), n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(receiver)
    }
}
