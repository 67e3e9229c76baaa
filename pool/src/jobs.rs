use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tidepool_core::blockchain::block::{Block, PRE_HASH_LEN};
use tidepool_core::blockchain::consensus::{self, Target};

/// Job ids are positive 31-bit integers; the counter wraps to 0 after this.
pub const MAX_JOB_ID: u32 = 0x7FFF_FFFF;

/// One candidate as handed to miners.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u32,
    pub block: Arc<Block>,
    pub pre_hash: [u8; PRE_HASH_LEN],
    /// Pool (share) target, easier than the block's own target.
    pub target: Target,
    pub miner_reward: u64,
    pub solved: bool,
}

impl Job {
    pub fn pre_hash_hex(&self) -> String {
        hex::encode(self.pre_hash)
    }

    pub fn target_hex(&self) -> String {
        consensus::target_hex_prefix(&self.target)
    }

    pub fn block_target(&self) -> Target {
        consensus::target_from_difficulty(self.block.header.difficulty)
    }
}

/// Bounded window of the most recently created jobs.
///
/// Eviction follows creation order, so a wrapped id counter never
/// evicts a newer job in favour of an older one.
pub struct JobRegistry {
    jobs: HashMap<u32, Job>,
    order: VecDeque<u32>,
    last_id: u32,
    window: usize,
}

impl JobRegistry {
    pub fn new(window: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            order: VecDeque::new(),
            last_id: 0,
            window: window.max(1),
        }
    }

    fn next_id(&mut self) -> u32 {
        self.last_id = if self.last_id >= MAX_JOB_ID { 0 } else { self.last_id + 1 };
        self.last_id
    }

    pub fn create(
        &mut self,
        block: Block,
        pre_hash: [u8; PRE_HASH_LEN],
        target: Target,
        miner_reward: u64,
    ) -> Job {
        let id = self.next_id();
        let job = Job {
            id,
            block: Arc::new(block),
            pre_hash,
            target,
            miner_reward,
            solved: false,
        };

        self.order.retain(|j| *j != id);
        self.order.push_back(id);
        self.jobs.insert(id, job.clone());
        while self.order.len() > self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.jobs.remove(&oldest);
            }
        }
        job
    }

    pub fn get(&self, id: u32) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// The most recently created job, if it is still open.
    pub fn current_open(&self) -> Option<&Job> {
        let id = self.order.back()?;
        self.jobs.get(id).filter(|j| !j.solved)
    }

    pub fn solve_all(&mut self) {
        for job in self.jobs.values_mut() {
            job.solved = true;
        }
    }

    pub fn last_id(&self) -> u32 {
        self.last_id
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn with_last_id(window: usize, last_id: u32) -> Self {
        let mut reg = Self::new(window);
        reg.last_id = last_id;
        reg
    }
}
