use serde::Deserialize;
use std::time::Duration;
use tidepool_core::blockchain::consensus::POOL_SOLUTION_SPACE;

/// Runtime settings shared by every pool component.
///
/// Built once by [`Config::load`]: defaults, then `pool_config.json` (or the
/// file named by `TIDEPOOL_CONFIG`), then `TIDEPOOL_*` environment overrides.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    pub stratum_listen: String,
    pub api_listen: String,
    pub connection_limit: usize,
    pub redis_url: String,
    /// Key/channel namespace inside Redis.
    pub redis_prefix: String,
    pub node_rpc_url: String,
    /// Address credited as coinbase miner in every candidate.
    pub pool_address: String,
    /// Hex-encoded 32-byte Ed25519 secret of the payout wallet.
    pub banker_secret_key: String,
    pub confirmation_depth: u64,
    pub pool_solution_space: f64,
    pub test_block_difficulty: f64,
    pub test_work_interval_secs: u64,
    pub job_window: usize,
    pub reissue_interval_secs: u64,
    pub stale_tip_secs: u64,
    pub hashrate_sma_window: u32,
    pub banker_interval_secs: u64,
    pub pool_fee: f64,
    pub miner_fee: f64,
    pub uncle_info_url: String,
    pub uncle_fallback_depth: u64,
    pub tip_poll_millis: u64,
    /// Skip the stale-tip guard while the chain is being bootstrapped.
    pub bootstrap: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stratum_listen: "0.0.0.0:9081".to_string(),
            api_listen: "0.0.0.0:8080".to_string(),
            connection_limit: 70,
            redis_url: "redis://127.0.0.1/".to_string(),
            redis_prefix: "tidepool".to_string(),
            node_rpc_url: "http://127.0.0.1:8148/jsonrpc".to_string(),
            pool_address: String::new(),
            banker_secret_key: String::new(),
            confirmation_depth: 200,
            pool_solution_space: POOL_SOLUTION_SPACE,
            test_block_difficulty: 1e-5,
            test_work_interval_secs: 10,
            job_window: 10,
            reissue_interval_secs: 10,
            stale_tip_secs: 24 * 60 * 60,
            hashrate_sma_window: 20,
            banker_interval_secs: 120,
            pool_fee: 0.005,
            miner_fee: 1e-9,
            uncle_info_url: "http://127.0.0.1:2442/api/v1/uncleinfo/".to_string(),
            uncle_fallback_depth: 2,
            tip_poll_millis: 1_000,
            bootstrap: false,
        }
    }
}

fn env_override<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!("ignoring unparsable {}={}", key, raw),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let path =
            std::env::var("TIDEPOOL_CONFIG").unwrap_or_else(|_| "pool_config.json".to_string());
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(txt) => match Self::from_json(&txt) {
                Ok(c) => {
                    tracing::info!("Loaded pool config from {}", path);
                    c
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} (using defaults)", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };

        cfg.apply_env();
        cfg.normalize();
        cfg
    }

    pub fn from_json(txt: &str) -> serde_json::Result<Self> {
        serde_json::from_str(txt)
    }

    fn apply_env(&mut self) {
        env_override("TIDEPOOL_STRATUM_LISTEN", &mut self.stratum_listen);
        env_override("TIDEPOOL_API_LISTEN", &mut self.api_listen);
        env_override("TIDEPOOL_CONNECTION_LIMIT", &mut self.connection_limit);
        env_override("TIDEPOOL_REDIS_URL", &mut self.redis_url);
        env_override("TIDEPOOL_REDIS_PREFIX", &mut self.redis_prefix);
        env_override("TIDEPOOL_NODE_RPC", &mut self.node_rpc_url);
        env_override("TIDEPOOL_POOL_ADDRESS", &mut self.pool_address);
        env_override("TIDEPOOL_BANKER_SECRET", &mut self.banker_secret_key);
        env_override("TIDEPOOL_CONFIRMATIONS", &mut self.confirmation_depth);
        env_override("TIDEPOOL_SOLUTION_SPACE", &mut self.pool_solution_space);
        env_override("TIDEPOOL_TEST_DIFFICULTY", &mut self.test_block_difficulty);
        env_override("TIDEPOOL_JOB_WINDOW", &mut self.job_window);
        env_override("TIDEPOOL_REISSUE_SECS", &mut self.reissue_interval_secs);
        env_override("TIDEPOOL_BANKER_INTERVAL", &mut self.banker_interval_secs);
        env_override("TIDEPOOL_POOL_FEE", &mut self.pool_fee);
        env_override("TIDEPOOL_MINER_FEE", &mut self.miner_fee);
        env_override("TIDEPOOL_UNCLE_INFO_URL", &mut self.uncle_info_url);
        env_override("TIDEPOOL_BOOTSTRAP", &mut self.bootstrap);
    }

    /// Zero, negative and out-of-range values fall back to defaults.
    pub fn normalize(&mut self) {
        let d = Self::default();
        if self.connection_limit == 0 {
            self.connection_limit = d.connection_limit;
        }
        if self.job_window == 0 {
            self.job_window = d.job_window;
        }
        if !(self.pool_solution_space >= 1.0) {
            self.pool_solution_space = d.pool_solution_space;
        }
        if !(self.test_block_difficulty > 0.0 && self.test_block_difficulty <= 1.0) {
            self.test_block_difficulty = d.test_block_difficulty;
        }
        if self.test_work_interval_secs == 0 {
            self.test_work_interval_secs = d.test_work_interval_secs;
        }
        if self.reissue_interval_secs == 0 {
            self.reissue_interval_secs = d.reissue_interval_secs;
        }
        if self.stale_tip_secs == 0 {
            self.stale_tip_secs = d.stale_tip_secs;
        }
        if self.hashrate_sma_window == 0 {
            self.hashrate_sma_window = d.hashrate_sma_window;
        }
        if self.banker_interval_secs == 0 {
            self.banker_interval_secs = d.banker_interval_secs;
        }
        if !(0.0..1.0).contains(&self.pool_fee) {
            self.pool_fee = d.pool_fee;
        }
        if !(self.miner_fee >= 0.0) {
            self.miner_fee = d.miner_fee;
        }
        if self.tip_poll_millis == 0 {
            self.tip_poll_millis = d.tip_poll_millis;
        }
        if self.confirmation_depth == 0 {
            self.confirmation_depth = d.confirmation_depth;
        }
    }

    pub fn reissue_interval(&self) -> Duration {
        Duration::from_secs(self.reissue_interval_secs)
    }

    pub fn banker_interval(&self) -> Duration {
        Duration::from_secs(self.banker_interval_secs)
    }

    pub fn stale_tip(&self) -> Duration {
        Duration::from_secs(self.stale_tip_secs)
    }

    pub fn test_work_interval(&self) -> Duration {
        Duration::from_secs(self.test_work_interval_secs)
    }

    pub fn tip_poll(&self) -> Duration {
        Duration::from_millis(self.tip_poll_millis)
    }
}
