/// Redis-backed pool store
///
/// Layout (all keys under the configured prefix):
/// - `<p>:workers`         hash, session id → worker JSON
/// - `<p>:mined`           hash, block hash → mined block JSON
/// - `<p>:mined:order`     list of block hashes, insertion order
/// - `<p>:history`         list of archived mined block JSON, newest first
/// - `<p>:snapshot:pool`   pool snapshot JSON
/// - `<p>:snapshot:network` network snapshot JSON

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

use super::{MinedBlock, MinedBlockStatus, NetworkSnapshot, PoolSnapshot, PoolStore};
use crate::metrics::prometheus as metrics;
use crate::workers::{Worker, WorkerUpdate};

/// HSET only while the field still exists, so an update racing a removal
/// cannot bring the worker back.
const HSET_IF_PRESENT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    return 1
end
return 0
"#;

static HSET_IF_PRESENT_SCRIPT: OnceLock<redis::Script> = OnceLock::new();

fn hset_if_present() -> &'static redis::Script {
    HSET_IF_PRESENT_SCRIPT.get_or_init(|| redis::Script::new(HSET_IF_PRESENT))
}

pub struct RedisStore {
    client: redis::Client,
    connection: Arc<RwLock<Option<redis::aio::ConnectionManager>>>,
    prefix: String,
}

fn parse<T: DeserializeOwned>(raw: &str, what: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!("Corrupt {} record in Redis: {}", what, e);
            None
        }
    }
}

impl RedisStore {
    pub fn new(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow!("Failed to create Redis client: {}", e))?;
        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// Get async connection (lazy initialization)
    async fn get_connection(&self) -> Result<redis::aio::ConnectionManager> {
        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let manager = self.client.get_connection_manager().await.map_err(|e| {
            metrics::inc_redis_errors();
            anyhow!("Failed to get connection manager: {}", e)
        })?;
        *guard = Some(manager.clone());
        Ok(manager)
    }

    fn redis_err(op: &str, e: redis::RedisError) -> anyhow::Error {
        metrics::inc_redis_errors();
        anyhow!("Redis {} failed: {}", op, e)
    }

    async fn get_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn
            .get(self.key(name))
            .await
            .map_err(|e| Self::redis_err("GET", e))?;
        Ok(raw.and_then(|r| parse(&r, name)))
    }

    async fn set_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let json = serde_json::to_string(value)?;
        conn.set::<_, _, ()>(self.key(name), json)
            .await
            .map_err(|e| Self::redis_err("SET", e))
    }
}

#[async_trait]
impl PoolStore for RedisStore {
    async fn reset_workers(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        conn.del::<_, ()>(self.key("workers"))
            .await
            .map_err(|e| Self::redis_err("DEL", e))
    }

    async fn upsert_worker(&self, worker: &Worker) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let json = serde_json::to_string(worker)?;
        conn.hset::<_, _, _, ()>(self.key("workers"), &worker.id, json)
            .await
            .map_err(|e| Self::redis_err("HSET", e))
    }

    async fn update_worker(&self, id: &str, update: &WorkerUpdate) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.key("workers");
        let raw: Option<String> = conn.hget(&key, id).await.map_err(|e| Self::redis_err("HGET", e))?;
        let Some(mut worker) = raw.and_then(|r| parse::<Worker>(&r, "worker")) else {
            return Ok(());
        };
        worker.apply(update);
        let json = serde_json::to_string(&worker)?;
        let written: i64 = hset_if_present()
            .key(&key)
            .arg(id)
            .arg(json)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::redis_err("EVALSHA", e))?;
        if written == 0 {
            tracing::debug!("Worker {} removed before its update landed", id);
        }
        Ok(())
    }

    async fn remove_worker(&self, id: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        conn.hdel::<_, _, ()>(self.key("workers"), id)
            .await
            .map_err(|e| Self::redis_err("HDEL", e))
    }

    async fn workers(&self) -> Result<Vec<Worker>> {
        let mut conn = self.get_connection().await?;
        let all: HashMap<String, String> = conn
            .hgetall(self.key("workers"))
            .await
            .map_err(|e| Self::redis_err("HGETALL", e))?;
        let mut workers: Vec<Worker> = all.values().filter_map(|r| parse(r, "worker")).collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workers)
    }

    async fn add_mined_block(&self, block: &MinedBlock) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let json = serde_json::to_string(block)?;
        conn.hset::<_, _, _, ()>(self.key("mined"), &block.hash, json)
            .await
            .map_err(|e| Self::redis_err("HSET", e))?;
        conn.rpush::<_, _, ()>(self.key("mined:order"), &block.hash)
            .await
            .map_err(|e| Self::redis_err("RPUSH", e))
    }

    async fn mined_blocks(&self) -> Result<Vec<MinedBlock>> {
        let mut conn = self.get_connection().await?;
        let order: Vec<String> = conn
            .lrange(self.key("mined:order"), 0, -1)
            .await
            .map_err(|e| Self::redis_err("LRANGE", e))?;
        let mut all: HashMap<String, String> = conn
            .hgetall(self.key("mined"))
            .await
            .map_err(|e| Self::redis_err("HGETALL", e))?;
        Ok(order
            .iter()
            .filter_map(|h| all.remove(h))
            .filter_map(|r| parse(&r, "mined block"))
            .collect())
    }

    async fn update_mined_block_status(&self, hash: &str, status: MinedBlockStatus) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.key("mined");
        let raw: Option<String> = conn.hget(&key, hash).await.map_err(|e| Self::redis_err("HGET", e))?;
        let Some(mut block) = raw.and_then(|r| parse::<MinedBlock>(&r, "mined block")) else {
            return Ok(());
        };
        block.status = status;
        let json = serde_json::to_string(&block)?;
        conn.hset::<_, _, _, ()>(&key, hash, json)
            .await
            .map_err(|e| Self::redis_err("HSET", e))
    }

    async fn delete_mined_block(&self, hash: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        conn.hdel::<_, _, ()>(self.key("mined"), hash)
            .await
            .map_err(|e| Self::redis_err("HDEL", e))?;
        conn.lrem::<_, _, ()>(self.key("mined:order"), 0, hash)
            .await
            .map_err(|e| Self::redis_err("LREM", e))
    }

    async fn add_history(&self, block: &MinedBlock) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let json = serde_json::to_string(block)?;
        conn.lpush::<_, _, ()>(self.key("history"), json)
            .await
            .map_err(|e| Self::redis_err("LPUSH", e))
    }

    async fn history(&self, limit: usize) -> Result<Vec<MinedBlock>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = conn
            .lrange(self.key("history"), 0, limit as isize - 1)
            .await
            .map_err(|e| Self::redis_err("LRANGE", e))?;
        Ok(raw.iter().filter_map(|r| parse(r, "history")).collect())
    }

    async fn pool_snapshot(&self) -> Result<Option<PoolSnapshot>> {
        self.get_json("snapshot:pool").await
    }

    async fn replace_pool_snapshot(&self, snapshot: &PoolSnapshot) -> Result<()> {
        self.set_json("snapshot:pool", snapshot).await
    }

    async fn network_snapshot(&self) -> Result<Option<NetworkSnapshot>> {
        self.get_json("snapshot:network").await
    }

    async fn replace_network_snapshot(&self, snapshot: &NetworkSnapshot) -> Result<()> {
        self.set_json("snapshot:network", snapshot).await
    }
}
