mod common;

use common::{address, block, candidate, eventually, now_millis, FakeNode};
use std::sync::Arc;
use std::time::Duration;
use tidepool::channel::{self, MemoryChannel, PutWork, SubmitWork, Topic, WorkChannel};
use tidepool::config::Config;
use tidepool::producer::CandidateProducer;
use tidepool::store::{MemoryStore, MinedBlockStatus, PoolSnapshot, PoolStore};
use tidepool::workers::{Worker, WorkerUpdate};
use tidepool_core::blockchain::block::Hash;
use tidepool_core::blockchain::consensus;
use tidepool_core::tx::{SignedTx, UnsignedTx};

struct Rig {
    node: Arc<FakeNode>,
    channel: Arc<MemoryChannel>,
    store: Arc<MemoryStore>,
    producer: Arc<CandidateProducer>,
}

fn rig(config: Config) -> Rig {
    let node = FakeNode::new();
    let channel = Arc::new(MemoryChannel::new());
    let store = Arc::new(MemoryStore::new());
    let producer = Arc::new(CandidateProducer::new(
        Arc::new(config),
        node.services(),
        channel.clone(),
        store.clone(),
    ));
    Rig {
        node,
        channel,
        store,
        producer,
    }
}

fn pool_config() -> Config {
    Config {
        pool_address: address(200),
        ..Config::default()
    }
}

fn worker(id: &str, seed: u8, shares: u64) -> Worker {
    Worker {
        id: id.into(),
        address: address(seed),
        name: format!("pool_{id}"),
        ip: "10.0.0.1".into(),
        shares,
        hashrate: 0.0,
        tick: 0,
    }
}

fn transfer(nonce: u64) -> SignedTx {
    SignedTx::unsigned_for_tests(UnsignedTx {
        from: address(1),
        to: address(2),
        amount: 1,
        fee: 1,
        nonce,
    })
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_tip_publishes_candidate_with_uncles() {
    let r = rig(pool_config());
    *r.node.next_valid.lock().unwrap() = vec![transfer(1)];
    *r.node.next_invalid.lock().unwrap() = vec![transfer(9)];
    let mut work = r.channel.subscribe(Topic::PutWork).await.unwrap();

    r.producer.on_chain_candidate(candidate(3, now_millis(), &[7, 8])).await;

    let msg: PutWork = channel::decode(&work.recv().await.unwrap()).unwrap();
    let b = msg.block().unwrap();
    assert_eq!(msg.miner_reward, 12_000_000_000);
    assert_eq!(msg.pre_hash().unwrap(), b.header.pre_hash());
    assert_eq!(
        b.header.previous_hash,
        vec![Hash([3u8; 32]), Hash([7u8; 32]), Hash([8u8; 32])]
    );
    assert_eq!(b.header.nonce, None);
    assert_eq!(b.header.miner, address(200));
    assert_eq!(b.header.state_root, Hash([100u8; 32]));
    assert_eq!(b.txs, vec![transfer(1)]);

    let requests = r.node.next_requests.lock().unwrap().clone();
    assert_eq!(requests[0].height, 100);
    assert_eq!(requests[0].uncles.len(), 2);
    assert_eq!(*r.node.removed_txs.lock().unwrap(), vec![transfer(9)]);

    let net = r.store.network_snapshot().await.unwrap().unwrap();
    assert_eq!(net.block_gap, 1);
    assert_eq!(net.pool_diff, consensus::pool_difficulty(1e-4, 200.0));
    assert_eq!(net.hashrate, consensus::network_hashrate(1e-4));
}

#[tokio::test]
async fn stale_tip_publishes_nothing() {
    let r = rig(pool_config());
    let mut work = r.channel.subscribe(Topic::PutWork).await.unwrap();
    let two_days_ago = now_millis() - 2 * 86_400_000;

    r.producer.on_chain_candidate(candidate(3, two_days_ago, &[])).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(work.try_recv().is_err());
    assert!(r.store.network_snapshot().await.unwrap().is_none());
    assert_eq!(r.producer.current_tip().await, None);
}

#[tokio::test]
async fn bootstrap_mines_on_stale_tip() {
    let r = rig(Config {
        bootstrap: true,
        ..pool_config()
    });
    let mut work = r.channel.subscribe(Topic::PutWork).await.unwrap();
    r.producer.on_chain_candidate(candidate(3, 1_000, &[])).await;
    assert!(work.recv().await.is_some());
}

#[tokio::test]
async fn reissue_follows_latest_tip_only() {
    let r = rig(Config {
        reissue_interval_secs: 1,
        ..pool_config()
    });
    let mut work = r.channel.subscribe(Topic::PutWork).await.unwrap();

    r.producer.on_chain_candidate(candidate(3, now_millis(), &[])).await;
    r.producer.on_chain_candidate(candidate(4, now_millis(), &[])).await;
    assert_eq!(r.producer.current_tip().await, Some(Hash([4u8; 32])));

    // Two immediate candidates, then at least one reissue.
    let mut parents = Vec::new();
    while parents.len() < 3 {
        let payload = tokio::time::timeout(Duration::from_secs(5), work.recv())
            .await
            .unwrap()
            .unwrap();
        let msg: PutWork = channel::decode(&payload).unwrap();
        parents.push(msg.block().unwrap().header.previous_hash[0]);
    }
    assert_eq!(parents[0], Hash([3u8; 32]));
    assert!(parents[1..].iter().all(|p| *p == Hash([4u8; 32])));
}

// ---------------------------------------------------------------------------
// Solved blocks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn solved_block_closes_the_round() {
    let r = rig(pool_config());
    r.store.upsert_worker(&worker("a", 1, 30)).await.unwrap();
    r.store.upsert_worker(&worker("b", 2, 50)).await.unwrap();
    r.store.upsert_worker(&worker("c", 1, 20)).await.unwrap();
    r.store
        .replace_pool_snapshot(&PoolSnapshot { hashrate: 100.0, tick: 0 })
        .await
        .unwrap();

    // Two candidates since the last block.
    r.producer.on_chain_candidate(candidate(3, now_millis(), &[])).await;
    r.producer.on_chain_candidate(candidate(4, now_millis(), &[])).await;
    assert_eq!(r.producer.block_gap().await, 2);

    let mut solved = block(1e-4);
    solved.header.nonce = Some(42);
    r.producer.on_submitted_block(solved.clone(), 12_000_000_000).await;

    assert_eq!(*r.node.broadcast_blocks.lock().unwrap(), vec![solved.clone()]);
    assert_eq!(*r.node.put_blocks.lock().unwrap(), vec![solved.clone()]);
    assert_eq!(r.producer.block_gap().await, 0);

    let instant = consensus::network_hashrate(1e-4) / 2.0;
    let expected = (100.0 * 19.0 + instant) / 20.0;
    let pool = r.store.pool_snapshot().await.unwrap().unwrap();
    assert!((pool.hashrate - expected).abs() < 1e-9);

    let mined = r.store.mined_blocks().await.unwrap();
    assert_eq!(mined.len(), 1);
    let m = &mined[0];
    assert_eq!(m.hash, solved.hash().to_hex());
    assert_eq!(m.prev_hash, Hash([5u8; 32]).to_hex());
    assert_eq!(m.status, MinedBlockStatus::Pending);
    assert_eq!(m.addresses, vec![address(1), address(2)]);
    assert_eq!(m.shares, vec![50, 50]);
    assert_eq!(m.total_shares, 100);
    assert_eq!(m.reward, 12_000_000_000);
    assert!(!m.paid);

    let workers = r.store.workers().await.unwrap();
    assert!(workers.iter().all(|w| w.shares == 0));
    let b = workers.iter().find(|w| w.id == "b").unwrap();
    assert!((b.hashrate - expected * 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn empty_round_records_block_without_hashrate() {
    let r = rig(pool_config());
    r.store.upsert_worker(&worker("a", 1, 0)).await.unwrap();
    r.store
        .update_worker("a", &WorkerUpdate { hashrate: Some(5.0), ..Default::default() })
        .await
        .unwrap();

    r.producer.update_statistics(&block(1e-4), 7).await;

    let workers = r.store.workers().await.unwrap();
    assert_eq!(workers[0].hashrate, 0.0);
    let mined = r.store.mined_blocks().await.unwrap();
    assert_eq!(mined[0].total_shares, 0);
    assert_eq!(r.store.pool_snapshot().await.unwrap().unwrap().hashrate, 0.0);
}

#[tokio::test]
async fn submit_work_topic_drives_producer() {
    let r = rig(pool_config());
    r.producer.start().await.unwrap();

    let mut solved = block(1e-4);
    solved.header.nonce = Some(1);
    let msg = SubmitWork::new(&solved, 5).unwrap();
    channel::publish_message(r.channel.as_ref(), Topic::SubmitWork, &msg).await;

    let node = r.node.clone();
    assert!(eventually(Duration::from_secs(2), || {
        let node = node.clone();
        async move { node.put_blocks.lock().unwrap().len() == 1 }
    })
    .await);
    let store = r.store.clone();
    assert!(eventually(Duration::from_secs(2), || {
        let store = store.clone();
        async move { store.mined_blocks().await.unwrap().len() == 1 }
    })
    .await);
}
