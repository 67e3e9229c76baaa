//! Stratum coordinator: owns the job window and the authorized workers,
//! validates shares against pool and block targets, and relays solved blocks
//! back over the work channel.
//!
//! Registries sit behind their own async mutexes and are never held across
//! each other or across the proof-of-work hash. Worker rows reach the store
//! through a [`WorkerWriter`] queue, off the response path.

use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tidepool_core::blockchain::block::{Block, PRE_HASH_LEN};
use tidepool_core::blockchain::consensus;
use tidepool_core::pow::{self, PowHasher};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::persist::WorkerWriter;
use super::protocol::{
    authorize_address, normalize_method, JobNotification, StratumError, StratumRequest,
    StratumResponse, SubmitParams,
};
use crate::channel::{self, PutWork, SubmitWork, Topic, WorkChannel};
use crate::config::Config;
use crate::error::SubmitRejection;
use crate::jobs::{Job, JobRegistry};
use crate::metrics::prometheus as metrics;
use crate::store::PoolStore;
use crate::workers::{WorkerRegistry, WorkerUpdate};

/// Upper bound of the random starting job prefix.
pub const MAX_JOB_PREFIX: u32 = 0x7FFFF;

pub type NotifySender = mpsc::UnboundedSender<JobNotification>;

/// Live connection: where to push notifications, and the peer address.
struct SessionLink {
    ip: String,
    notify: NotifySender,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Met the pool target only.
    Share,
    /// Met the block target; the solved block was published.
    Block,
    /// The job was already solved; accepted without credit.
    AlreadySolved,
}

pub struct StratumCoordinator {
    pool_solution_space: f64,
    jobs: Mutex<JobRegistry>,
    workers: Mutex<WorkerRegistry>,
    links: RwLock<HashMap<String, SessionLink>>,
    hasher: Arc<dyn PowHasher>,
    store: Arc<dyn PoolStore>,
    writer: WorkerWriter,
    channel: Option<Arc<dyn WorkChannel>>,
}

fn random_job_prefix() -> u32 {
    rand::thread_rng().gen_range(1..=MAX_JOB_PREFIX)
}

impl StratumCoordinator {
    /// `channel` is `None` in test-work mode, where jobs are fed directly.
    pub fn new(
        config: &Config,
        hasher: Arc<dyn PowHasher>,
        store: Arc<dyn PoolStore>,
        channel: Option<Arc<dyn WorkChannel>>,
    ) -> Self {
        Self {
            pool_solution_space: config.pool_solution_space,
            jobs: Mutex::new(JobRegistry::new(config.job_window)),
            workers: Mutex::new(WorkerRegistry::new()),
            links: RwLock::new(HashMap::new()),
            hasher,
            writer: WorkerWriter::spawn(Arc::clone(&store)),
            store,
            channel,
        }
    }

    /// Drop workers persisted by a previous process.
    pub async fn reset_store(&self) {
        if let Err(e) = self.store.reset_workers().await {
            tracing::warn!("Failed to reset persisted workers: {}", e);
        }
    }

    /// Subscribe to put-work (new jobs) and submit-work (own solutions echoed back).
    pub async fn start_channel_listeners(self: &Arc<Self>) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let Some(channel) = self.channel.clone() else {
            return Ok(Vec::new());
        };
        let mut put_rx = channel.subscribe(Topic::PutWork).await?;
        let mut submit_rx = channel.subscribe(Topic::SubmitWork).await?;

        let this = Arc::clone(self);
        let put_task = tokio::spawn(async move {
            while let Some(payload) = put_rx.recv().await {
                match channel::decode::<PutWork>(&payload) {
                    Ok(msg) => this.on_put_work_message(msg).await,
                    Err(e) => tracing::error!("Undecodable put-work message: {}", e),
                }
            }
        });

        let this = Arc::clone(self);
        let submit_task = tokio::spawn(async move {
            while submit_rx.recv().await.is_some() {
                tracing::info!("Block submitted, closing open jobs");
                this.reset().await;
            }
        });

        Ok(vec![put_task, submit_task])
    }

    async fn on_put_work_message(&self, msg: PutWork) {
        let decoded = msg.block().and_then(|b| Ok((b, msg.pre_hash()?)));
        match decoded {
            Ok((block, pre_hash)) => {
                self.on_put_work(block, pre_hash, msg.miner_reward).await;
            }
            Err(e) => tracing::error!("Malformed put-work message: {}", e),
        }
    }

    /// Register a new candidate as a job and fan it out to every authorized
    /// worker with consecutive job prefixes.
    pub async fn on_put_work(
        &self,
        block: Block,
        pre_hash: [u8; PRE_HASH_LEN],
        miner_reward: u64,
    ) -> u32 {
        let pool_diff = consensus::pool_difficulty(block.header.difficulty, self.pool_solution_space);
        let target = consensus::target_from_difficulty(pool_diff);
        let job = self.jobs.lock().await.create(block, pre_hash, target, miner_reward);
        metrics::inc_jobs_issued();
        tracing::debug!("Created job {} (pool difficulty {:e})", job.id, pool_diff);

        let worker_ids = self.workers.lock().await.ids();
        let links = self.links.read().await;
        let mut prefix = random_job_prefix();
        for id in worker_ids {
            if let Some(link) = links.get(&id) {
                Self::notify(link, &job, prefix);
                prefix = prefix.wrapping_add(1);
            }
        }
        job.id
    }

    fn notify(link: &SessionLink, job: &Job, job_prefix: u32) {
        let n = JobNotification {
            job_prefix,
            pre_hash_hex: job.pre_hash_hex(),
            target_hex: job.target_hex(),
            job_id: job.id,
        };
        if link.notify.send(n).is_err() {
            tracing::debug!("Notification for job {} dropped, connection gone", job.id);
        }
    }

    /// A connection opened; it can subscribe and authorize from now on.
    pub async fn connect(&self, session_id: &str, ip: &str, notify: NotifySender) {
        self.links.write().await.insert(
            session_id.to_string(),
            SessionLink {
                ip: ip.to_string(),
                notify,
            },
        );
    }

    pub fn subscribe(&self, session_id: &str) -> Value {
        json!([session_id, "0", "0", 4])
    }

    /// Admit the connection as a worker for `address`. Sends the latest open
    /// job right away.
    pub async fn authorize(&self, session_id: &str, address: &str) -> bool {
        if !tidepool_core::crypto::keys::is_valid_address(address) {
            tracing::warn!("Rejected worker with invalid address {}", address);
            return false;
        }
        let ip = match self.links.read().await.get(session_id) {
            Some(link) => link.ip.clone(),
            None => {
                tracing::warn!("Authorize from unknown session {}", session_id);
                return false;
            }
        };

        let (worker, count) = {
            let mut workers = self.workers.lock().await;
            let w = workers.admit(session_id, address, &ip);
            (w, workers.len())
        };
        metrics::set_authorized_workers(count);
        tracing::info!("New worker joined: {} ## {} ## {}", worker.name, address, ip);
        self.writer.upsert(worker);

        let current = self.jobs.lock().await.current_open().cloned();
        if let Some(job) = current {
            if let Some(link) = self.links.read().await.get(session_id) {
                Self::notify(link, &job, random_job_prefix());
            }
        }
        true
    }

    /// Validate a nonce for `job_id` on behalf of the worker behind `session_id`.
    pub async fn submit(
        &self,
        session_id: &str,
        job_id: u32,
        nonce_hex: &str,
    ) -> Result<SubmitOutcome, SubmitRejection> {
        let res = self.submit_inner(session_id, job_id, nonce_hex).await;
        match &res {
            Ok(SubmitOutcome::AlreadySolved) => {}
            Ok(_) => metrics::inc_shares_accepted(),
            Err(SubmitRejection::BadNonce) => metrics::inc_shares_rejected("bad_nonce"),
            Err(SubmitRejection::UnknownJob(_)) => metrics::inc_shares_rejected("unknown_job"),
            Err(SubmitRejection::UnknownWorker(_)) => metrics::inc_shares_rejected("unknown_worker"),
            Err(SubmitRejection::LowDifficulty) => metrics::inc_shares_rejected("low_difficulty"),
            Err(SubmitRejection::HashFailed(_)) => metrics::inc_shares_rejected("hash_failed"),
        }
        res
    }

    async fn submit_inner(
        &self,
        session_id: &str,
        job_id: u32,
        nonce_hex: &str,
    ) -> Result<SubmitOutcome, SubmitRejection> {
        let Some(nonce) = pow::parse_nonce_hex(nonce_hex) else {
            tracing::warn!("Invalid nonce {:?} from {}", nonce_hex, session_id);
            return Err(SubmitRejection::BadNonce);
        };

        let pre_hash = match self.jobs.lock().await.get(job_id) {
            Some(job) => job.pre_hash,
            None => {
                tracing::warn!("Submit for unknown or expired job {}", job_id);
                return Err(SubmitRejection::UnknownJob(job_id));
            }
        };
        let worker_name = match self.workers.lock().await.get(session_id) {
            Some(w) => w.name.clone(),
            None => {
                tracing::warn!("Submit from unauthorized session {}", session_id);
                return Err(SubmitRejection::UnknownWorker(session_id.to_string()));
            }
        };

        let input = pow::work_input(&pre_hash, nonce);
        let hasher = Arc::clone(&self.hasher);
        let digest = tokio::task::spawn_blocking(move || hasher.hash(&input))
            .await
            .map_err(|e| SubmitRejection::HashFailed(e.to_string()))?
            .map_err(|e| SubmitRejection::HashFailed(e.to_string()));
        let digest = match digest {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Hashing job {} for {} failed: {}", job_id, worker_name, e);
                return Err(e);
            }
        };
        tracing::debug!("job {} nonce {} hash {}", job_id, nonce_hex, hex::encode(digest));

        // Re-read the job: it may have been solved or evicted while hashing.
        let solved_block = {
            let mut jobs = self.jobs.lock().await;
            let job = jobs.get_mut(job_id).ok_or(SubmitRejection::UnknownJob(job_id))?;
            if job.solved {
                tracing::debug!("Job {} already solved", job_id);
                return Ok(SubmitOutcome::AlreadySolved);
            }
            if !consensus::acceptable(&digest, &job.target) {
                tracing::warn!("Invalid share from {}", worker_name);
                return Err(SubmitRejection::LowDifficulty);
            }
            if consensus::acceptable(&digest, &job.block_target()) {
                job.solved = true;
                let mut block = (*job.block).clone();
                block.header.nonce = Some(nonce);
                Some((block, job.miner_reward))
            } else {
                None
            }
        };

        self.credit_share(session_id, &worker_name).await;

        let Some((block, miner_reward)) = solved_block else {
            tracing::debug!("Valid share from {}", worker_name);
            return Ok(SubmitOutcome::Share);
        };

        metrics::inc_blocks_found();
        tracing::info!("Found a block {} (job {}, {})", block.hash(), job_id, worker_name);
        match (&self.channel, SubmitWork::new(&block, miner_reward)) {
            (Some(ch), Ok(msg)) => channel::publish_message(ch.as_ref(), Topic::SubmitWork, &msg).await,
            (None, _) => tracing::info!("No work channel, solved block kept local"),
            (_, Err(e)) => tracing::error!("Failed to encode solved block: {}", e),
        }
        Ok(SubmitOutcome::Block)
    }

    async fn credit_share(&self, session_id: &str, worker_name: &str) {
        let shares = self.workers.lock().await.credit_share(session_id);
        match shares {
            Some(shares) => self.writer.update(session_id, WorkerUpdate::shares(shares)),
            None => tracing::warn!("Worker {} left before its share was credited", worker_name),
        }
    }

    /// A block was submitted upstream: close every job and restart the round.
    pub async fn reset(&self) {
        self.jobs.lock().await.solve_all();
        self.workers.lock().await.reset_shares();
    }

    /// Connection closed: forget the link and the worker.
    pub async fn close(&self, session_id: &str) {
        self.links.write().await.remove(session_id);
        let (removed, count) = {
            let mut workers = self.workers.lock().await;
            let removed = workers.remove(session_id);
            (removed, workers.len())
        };
        metrics::set_authorized_workers(count);
        if let Some(worker) = removed {
            tracing::info!("Worker {} disconnected", worker.name);
            self.writer.remove(session_id);
        }
    }

    /// Wait for every queued worker write to reach the store.
    pub async fn flush_store(&self) {
        self.writer.flush().await;
    }

    pub async fn handle_request(&self, session_id: &str, req: StratumRequest) -> StratumResponse {
        let id = req.id;
        let params = req.params.unwrap_or(Value::Null);
        match normalize_method(&req.method) {
            "subscribe" => StratumResponse::success(id, self.subscribe(session_id)),
            "authorize" => match authorize_address(&params) {
                Some(address) => {
                    let ok = self.authorize(session_id, &address).await;
                    StratumResponse::success(id, json!([ok]))
                }
                None => StratumResponse::error(id, StratumError::invalid_params("missing address")),
            },
            "submit" => match SubmitParams::from_value(&params) {
                Some(p) => match self.submit(session_id, p.job_id, &p.nonce).await {
                    Ok(_) => StratumResponse::success(id, json!([true])),
                    Err(SubmitRejection::HashFailed(e)) => {
                        StratumResponse::error(id, StratumError::internal(format!("Fail to submit nonce: {e}")))
                    }
                    Err(_) => StratumResponse::success(id, json!([false])),
                },
                None => StratumResponse::error(id, StratumError::invalid_params("expected job_id and nonce")),
            },
            other => StratumResponse::error(id, StratumError::method_not_found(other)),
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn worker_shares(&self, session_id: &str) -> Option<u64> {
        self.workers.lock().await.get(session_id).map(|w| w.shares)
    }

    pub async fn job(&self, job_id: u32) -> Option<Job> {
        self.jobs.lock().await.get(job_id).cloned()
    }
}
