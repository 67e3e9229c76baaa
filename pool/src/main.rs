// Tidepool binary: runs the stratum side, the node side, or both.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tidepool::api::{self, ApiState};
use tidepool::blockchain::{HttpUncleInfo, NodeRpcClient, NodeServices, TipWatcher};
use tidepool::channel::{MemoryChannel, RedisChannel, WorkChannel};
use tidepool::config::Config;
use tidepool::payout::{Banker, Ed25519Signer};
use tidepool::producer::CandidateProducer;
use tidepool::store::{MemoryStore, PoolStore, RedisStore};
use tidepool::stratum::{StratumCoordinator, StratumServer, TestWorkSource};
use tidepool_core::pow::Blake3Hasher;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tidepool", version, about = "Pooled mining coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Worker-facing stratum server plus status API.
    Stratum {
        /// Feed synthetic jobs instead of listening on the work channel.
        #[arg(long)]
        test: bool,
    },
    /// Candidate producer and payout banker against the node RPC.
    Node,
    /// Both roles in one process over an in-memory channel and store.
    Standalone,
}

struct StratumSide {
    coordinator: Arc<StratumCoordinator>,
    server: Arc<StratumServer>,
}

async fn build_stratum(
    cfg: &Config,
    store: Arc<dyn PoolStore>,
    channel: Option<Arc<dyn WorkChannel>>,
) -> Result<StratumSide> {
    let coordinator = Arc::new(StratumCoordinator::new(cfg, Arc::new(Blake3Hasher), store, channel));
    coordinator.reset_store().await;
    coordinator.start_channel_listeners().await?;
    let server = Arc::new(StratumServer::new(
        &cfg.stratum_listen,
        cfg.connection_limit,
        coordinator.clone(),
    ));
    Ok(StratumSide { coordinator, server })
}

async fn start_node_side(
    cfg: Arc<Config>,
    store: Arc<dyn PoolStore>,
    channel: Arc<dyn WorkChannel>,
) -> Result<()> {
    let rpc = Arc::new(NodeRpcClient::new(&cfg.node_rpc_url, None));
    let node = NodeServices::from_rpc(rpc.clone());

    let producer = Arc::new(CandidateProducer::new(cfg.clone(), node.clone(), channel, store.clone()));
    producer.start().await?;
    let (candidates, _) = producer.spawn_candidate_loop();
    let mut watcher = TipWatcher::new(rpc, cfg.tip_poll());
    watcher.on_candidate(move |candidate| {
        if candidates.send(candidate).is_err() {
            tracing::error!("Candidate loop stopped, dropping tip event");
        }
    });
    watcher.start();

    if cfg.banker_secret_key.is_empty() {
        tracing::warn!("No banker secret key configured, payouts disabled");
        return Ok(());
    }
    let signer = Arc::new(Ed25519Signer::from_hex(&cfg.banker_secret_key)?);
    let uncle_info = Arc::new(HttpUncleInfo::new(&cfg.uncle_info_url)?);
    let banker = Arc::new(Banker::new(cfg.clone(), node, store, uncle_info, signer));
    banker.start();
    Ok(())
}

fn spawn_server(server: Arc<StratumServer>) {
    tokio::spawn(async move {
        if let Err(e) = server.start().await {
            tracing::error!("Stratum server stopped: {}", e);
        }
    });
}

fn check_pool_address(cfg: &Config) -> Result<()> {
    if !tidepool_core::crypto::keys::is_valid_address(&cfg.pool_address) {
        return Err(anyhow!("pool_address {:?} is not a valid address", cfg.pool_address));
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("No SIGTERM handler ({}), waiting for Ctrl+C", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl+C, shutting down");
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = Arc::new(Config::load());

    match cli.command {
        Command::Stratum { test } => {
            let store: Arc<dyn PoolStore> = Arc::new(RedisStore::new(&cfg.redis_url, &cfg.redis_prefix)?);
            let channel: Option<Arc<dyn WorkChannel>> = if test {
                None
            } else {
                Some(Arc::new(RedisChannel::new(&cfg.redis_url, &cfg.redis_prefix)?))
            };
            let side = build_stratum(&cfg, store.clone(), channel).await?;
            if test {
                tracing::info!("🧪 Test mode: synthetic jobs at base difficulty {:e}", cfg.test_block_difficulty);
                TestWorkSource::new(side.coordinator.clone(), cfg.test_block_difficulty, cfg.test_work_interval())
                    .start();
            }
            spawn_server(side.server);
            let state = ApiState::new(store, Some(side.coordinator));
            tokio::select! {
                res = api::serve(&cfg.api_listen, state) => res?,
                _ = shutdown_signal() => {}
            }
        }
        Command::Node => {
            check_pool_address(&cfg)?;
            let store: Arc<dyn PoolStore> = Arc::new(RedisStore::new(&cfg.redis_url, &cfg.redis_prefix)?);
            let channel: Arc<dyn WorkChannel> = Arc::new(RedisChannel::new(&cfg.redis_url, &cfg.redis_prefix)?);
            start_node_side(cfg.clone(), store, channel).await?;
            shutdown_signal().await;
        }
        Command::Standalone => {
            check_pool_address(&cfg)?;
            let store: Arc<dyn PoolStore> = Arc::new(MemoryStore::new());
            let channel: Arc<dyn WorkChannel> = Arc::new(MemoryChannel::new());
            let side = build_stratum(&cfg, store.clone(), Some(channel.clone())).await?;
            start_node_side(cfg.clone(), store.clone(), channel).await?;
            spawn_server(side.server);
            let state = ApiState::new(store, Some(side.coordinator));
            tokio::select! {
                res = api::serve(&cfg.api_listen, state) => res?,
                _ = shutdown_signal() => {}
            }
        }
    }

    tracing::info!("🏁 Tidepool shut down cleanly");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .init();

    run(Cli::parse()).await.context("tidepool exited with an error")
}
