//! Work channel: a topic-based fanout bridge between the candidate producer
//! and the stratum coordinator.
//!
//! Delivery is at-most-once with no acknowledgement. A subscriber only sees
//! messages published after it subscribed.

pub mod memory;
pub mod redis;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tidepool_core::blockchain::block::{Block, PRE_HASH_LEN};
use tokio::sync::mpsc;

pub use self::memory::MemoryChannel;
pub use self::redis::RedisChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Producer → coordinator: a new candidate to mine.
    PutWork,
    /// Coordinator → producer: a solved block.
    SubmitWork,
}

impl Topic {
    pub fn name(&self) -> &'static str {
        match self {
            Topic::PutWork => "putwork",
            Topic::SubmitWork => "submitwork",
        }
    }
}

pub type WorkReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

#[async_trait]
pub trait WorkChannel: Send + Sync {
    /// Fire-and-forget; transport errors are logged, never returned.
    async fn publish(&self, topic: Topic, payload: Vec<u8>);

    /// New receiver for every message published to `topic` from now on.
    async fn subscribe(&self, topic: Topic) -> Result<WorkReceiver>;
}

/// Candidate announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutWork {
    #[serde(with = "hex")]
    pub block: Vec<u8>,
    #[serde(with = "hex")]
    pub pre_hash: Vec<u8>,
    pub miner_reward: u64,
}

impl PutWork {
    pub fn new(block: &Block, pre_hash: &[u8; PRE_HASH_LEN], miner_reward: u64) -> Result<Self> {
        Ok(Self {
            block: block.encode()?,
            pre_hash: pre_hash.to_vec(),
            miner_reward,
        })
    }

    pub fn block(&self) -> Result<Block> {
        Ok(Block::decode(&self.block)?)
    }

    pub fn pre_hash(&self) -> Result<[u8; PRE_HASH_LEN]> {
        self.pre_hash
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("pre-hash must be {} bytes, got {}", PRE_HASH_LEN, self.pre_hash.len()))
    }
}

/// Solved block handed back to the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitWork {
    #[serde(with = "hex")]
    pub block: Vec<u8>,
    pub miner_reward: u64,
}

impl SubmitWork {
    pub fn new(block: &Block, miner_reward: u64) -> Result<Self> {
        Ok(Self {
            block: block.encode()?,
            miner_reward,
        })
    }

    pub fn block(&self) -> Result<Block> {
        Ok(Block::decode(&self.block)?)
    }
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(msg)?)
}

pub fn decode<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Serialize and publish, logging instead of failing.
pub async fn publish_message<T: Serialize>(channel: &dyn WorkChannel, topic: Topic, msg: &T) {
    match encode(msg) {
        Ok(payload) => channel.publish(topic, payload).await,
        Err(e) => tracing::error!("Failed to encode {} message: {}", topic.name(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_core::blockchain::block::{BlockHeader, Hash};

    fn block() -> Block {
        Block {
            header: BlockHeader {
                previous_hash: vec![Hash([1u8; 32])],
                merkle_root: Hash::default(),
                state_root: Hash([2u8; 32]),
                difficulty: 0.25,
                timestamp: 42,
                nonce: None,
                miner: "tide1pool".into(),
            },
            txs: vec![],
        }
    }

    #[test]
    fn test_put_work_wire_form() {
        let b = block();
        let msg = PutWork::new(&b, &b.header.pre_hash(), 12).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(json["miner_reward"], 12);
        assert_eq!(json["pre_hash"].as_str().unwrap().len(), PRE_HASH_LEN * 2);

        let back: PutWork = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(back.block().unwrap(), b);
        assert_eq!(back.pre_hash().unwrap(), b.header.pre_hash());
    }

    #[test]
    fn test_short_pre_hash_rejected() {
        let msg = PutWork {
            block: vec![],
            pre_hash: vec![0u8; 32],
            miner_reward: 0,
        };
        assert!(msg.pre_hash().is_err());
        assert!(msg.block().is_err());
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::PutWork.name(), "putwork");
        assert_eq!(Topic::SubmitWork.name(), "submitwork");
    }
}
