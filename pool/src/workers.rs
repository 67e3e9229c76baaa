use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Client counter wraps to 0 after this. Names start at `_1`.
pub const MAX_CLIENT_ID: u32 = 0x7FFF_FFFF;

/// A connected, authorized miner. This is the persistable part; the
/// notification link to its socket lives with the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    /// Session id of the owning connection.
    pub id: String,
    pub address: String,
    /// `<stratumId>_<clientId>`, unique per stratum process lifetime.
    pub name: String,
    pub ip: String,
    pub shares: u64,
    pub hashrate: f64,
    /// Unix milliseconds of the last share or admission.
    pub tick: i64,
}

/// Field-level change to a persisted worker; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashrate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<i64>,
}

impl WorkerUpdate {
    pub fn shares(shares: u64) -> Self {
        Self {
            shares: Some(shares),
            tick: Some(chrono::Utc::now().timestamp_millis()),
            ..Default::default()
        }
    }
}

impl Worker {
    pub fn apply(&mut self, update: &WorkerUpdate) {
        if let Some(s) = update.shares {
            self.shares = s;
        }
        if let Some(h) = update.hashrate {
            self.hashrate = h;
        }
        if let Some(t) = update.tick {
            self.tick = t;
        }
    }
}

fn random_stratum_id() -> String {
    let mut bytes = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Authorized workers of this stratum process, keyed by session id.
pub struct WorkerRegistry {
    workers: HashMap<String, Worker>,
    stratum_id: String,
    client_id: u32,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::with_stratum_id(random_stratum_id())
    }

    pub fn with_stratum_id(stratum_id: String) -> Self {
        Self {
            workers: HashMap::new(),
            stratum_id,
            client_id: 0,
        }
    }

    pub fn stratum_id(&self) -> &str {
        &self.stratum_id
    }

    fn next_name(&mut self) -> String {
        self.client_id = if self.client_id >= MAX_CLIENT_ID { 0 } else { self.client_id + 1 };
        format!("{}_{}", self.stratum_id, self.client_id)
    }

    /// Admit (or re-admit) the worker behind `session_id` with zero shares.
    pub fn admit(&mut self, session_id: &str, address: &str, ip: &str) -> Worker {
        let worker = Worker {
            id: session_id.to_string(),
            address: address.to_string(),
            name: self.next_name(),
            ip: ip.to_string(),
            shares: 0,
            hashrate: 0.0,
            tick: chrono::Utc::now().timestamp_millis(),
        };
        self.workers.insert(worker.id.clone(), worker.clone());
        worker
    }

    pub fn get(&self, session_id: &str) -> Option<&Worker> {
        self.workers.get(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.workers.contains_key(session_id)
    }

    /// Add one share; returns the new count.
    pub fn credit_share(&mut self, session_id: &str) -> Option<u64> {
        let worker = self.workers.get_mut(session_id)?;
        worker.shares += 1;
        worker.tick = chrono::Utc::now().timestamp_millis();
        Some(worker.shares)
    }

    pub fn reset_shares(&mut self) {
        for worker in self.workers.values_mut() {
            worker.shares = 0;
        }
    }

    pub fn remove(&mut self, session_id: &str) -> Option<Worker> {
        self.workers.remove(session_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
