mod common;

use common::{address, FakeNode, FixedUncleInfo};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tidepool::blockchain::Account;
use tidepool::config::Config;
use tidepool::payout::distribution::{self, plan};
use tidepool::payout::{Banker, Ed25519Signer, SweepSummary, TxSigner};
use tidepool::store::{MemoryStore, MinedBlock, MinedBlockStatus, PoolStore};
use tidepool_core::blockchain::block::Hash;
use tidepool_core::blockchain::consensus::{self, BlockStatus};
use tidepool_core::tx::{SignedTx, UnsignedTx};

const REWARD: u64 = 12_000_000_000;

struct Rig {
    node: Arc<FakeNode>,
    store: Arc<MemoryStore>,
    signer: Arc<Ed25519Signer>,
    banker: Banker,
    config: Arc<Config>,
}

fn rig(uncle_depth: Option<u64>) -> Rig {
    let node = FakeNode::new();
    let store = Arc::new(MemoryStore::new());
    let signer = Arc::new(Ed25519Signer::from_bytes(&[7u8; 32]));
    let config = Arc::new(Config::default());
    let banker = Banker::new(
        config.clone(),
        node.services(),
        store.clone(),
        Arc::new(FixedUncleInfo(uncle_depth)),
        signer.clone(),
    );
    node.set_tip(1_000);
    Rig {
        node,
        store,
        signer,
        banker,
        config,
    }
}

fn hash(seed: u8) -> Hash {
    Hash([seed; 32])
}

fn mined(seed: u8, shares: &[u64], total: u64) -> MinedBlock {
    MinedBlock {
        hash: hash(seed).to_hex(),
        status: MinedBlockStatus::Pending,
        prev_hash: hash(0).to_hex(),
        timestamp: 1_700_000_000_000,
        addresses: (0..shares.len()).map(|i| address(100 + i as u8)).collect(),
        shares: shares.to_vec(),
        total_shares: total,
        reward: REWARD,
        paid: false,
    }
}

fn amounts(txs: &[SignedTx]) -> Vec<(String, u64)> {
    txs.iter().map(|t| (t.tx.to.clone(), t.tx.amount)).collect()
}

fn nonces(txs: &[SignedTx]) -> Vec<u64> {
    txs.iter().map(SignedTx::nonce).collect()
}

// ---------------------------------------------------------------------------
// Classification and maturity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn immature_block_only_gets_its_label() {
    let r = rig(None);
    r.store.add_mined_block(&mined(1, &[30, 70], 100)).await.unwrap();
    r.node.place(hash(1), BlockStatus::MainChain, false, Some(900));

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(summary, SweepSummary { waiting: 1, ..Default::default() });

    let pending = r.store.mined_blocks().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, MinedBlockStatus::MainChain);
    assert!(r.node.pooled_txs.lock().unwrap().is_empty());
    assert!(r.store.history(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_height_never_matures() {
    let r = rig(None);
    r.store.add_mined_block(&mined(1, &[1], 1)).await.unwrap();

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(summary.waiting, 1);
    assert_eq!(r.store.mined_blocks().await.unwrap()[0].status, MinedBlockStatus::Pending);
}

#[tokio::test]
async fn matured_off_chain_block_is_orphaned() {
    let r = rig(None);
    r.store.add_mined_block(&mined(1, &[30, 70], 100)).await.unwrap();
    r.node.place(hash(1), BlockStatus::Block, false, Some(10));

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(summary.orphaned, 1);

    assert!(r.store.mined_blocks().await.unwrap().is_empty());
    let history = r.store.history(10).await.unwrap();
    assert_eq!(history[0].status, MinedBlockStatus::Orphan);
    assert!(!history[0].paid);
    assert!(r.node.pooled_txs.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Payouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn main_chain_block_pays_by_share() {
    let r = rig(None);
    *r.node.account.lock().unwrap() = Some(Account { balance: 100, nonce: 4 });
    let block = mined(1, &[30, 70], 100);
    r.store.add_mined_block(&block).await.unwrap();
    r.node.place(hash(1), BlockStatus::MainChain, false, Some(10));

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(summary, SweepSummary { paid: 1, ..Default::default() });

    let pooled = r.node.pooled_txs.lock().unwrap().clone();
    assert_eq!(
        amounts(&pooled),
        vec![
            (block.addresses[1].clone(), 8_357_999_999),
            (block.addresses[0].clone(), 3_581_999_999),
        ]
    );
    assert_eq!(nonces(&pooled), vec![5, 6]);
    assert!(pooled.iter().all(|t| t.verify() && t.tx.from == r.signer.address() && t.tx.fee == 1));
    assert_eq!(r.node.broadcast_txs.lock().unwrap().len(), 2);

    assert!(r.store.mined_blocks().await.unwrap().is_empty());
    let history = r.store.history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, MinedBlockStatus::MainChain);
    assert!(history[0].paid);
}

#[tokio::test]
async fn uncle_without_depth_uses_fallback() {
    let r = rig(None);
    let block = mined(2, &[1, 3], 4);
    r.store.add_mined_block(&block).await.unwrap();
    r.node.place(hash(2), BlockStatus::Block, true, Some(10));

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(summary.paid, 1);

    let reward = consensus::uncle_reward(REWARD, r.config.uncle_fallback_depth);
    let expected: Vec<(String, u64)> = plan(
        &block,
        reward,
        distribution::to_decimal(r.config.pool_fee),
        distribution::to_decimal(r.config.miner_fee),
    )
    .unwrap()
    .allocations
    .iter()
    .map(|a| (a.address.clone(), a.net_units().unwrap()))
    .collect();
    assert_eq!(amounts(&r.node.pooled_txs.lock().unwrap()), expected);

    let history = r.store.history(10).await.unwrap();
    assert_eq!(history[0].status, MinedBlockStatus::Uncle);
}

#[tokio::test]
async fn uncle_depth_from_lookup() {
    let r = rig(Some(1));
    let block = mined(2, &[1], 1);
    r.store.add_mined_block(&block).await.unwrap();
    r.node.place(hash(2), BlockStatus::Header, true, Some(10));

    r.banker.sweep().await.unwrap();

    let reward = consensus::uncle_reward(REWARD, 1);
    let paid = r.node.pooled_txs.lock().unwrap()[0].tx.amount;
    let expected = plan(
        &block,
        reward,
        distribution::to_decimal(r.config.pool_fee),
        distribution::to_decimal(r.config.miner_fee),
    )
    .unwrap()
    .allocations[0]
        .net_units()
        .unwrap();
    assert_eq!(paid, expected);
    assert!(reward < REWARD);
}

#[tokio::test]
async fn zero_share_contributors_are_skipped() {
    let r = rig(None);
    let block = mined(3, &[5, 0], 5);
    r.store.add_mined_block(&block).await.unwrap();
    r.node.place(hash(3), BlockStatus::MainChain, false, Some(10));

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(summary.paid, 1);

    let pooled = r.node.pooled_txs.lock().unwrap().clone();
    assert_eq!(pooled.len(), 1);
    assert_eq!(pooled[0].tx.to, block.addresses[0]);
    assert_eq!(pooled[0].nonce(), 0);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inconsistent_record_is_held() {
    let r = rig(None);
    r.store.add_mined_block(&mined(1, &[1, 2], 5)).await.unwrap();
    r.node.place(hash(1), BlockStatus::MainChain, false, Some(10));

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(summary, SweepSummary { held: 1, ..Default::default() });

    let pending = r.store.mined_blocks().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, MinedBlockStatus::MainChain);
    assert!(r.store.history(10).await.unwrap().is_empty());
    assert!(r.node.pooled_txs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_transfer_archives_unpaid() {
    let r = rig(None);
    r.node.fail_put_txs.store(true, Ordering::SeqCst);
    r.store.add_mined_block(&mined(1, &[30, 70], 100)).await.unwrap();
    r.node.place(hash(1), BlockStatus::MainChain, false, Some(10));

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(summary.failed, 1);

    assert!(r.store.mined_blocks().await.unwrap().is_empty());
    let history = r.store.history(10).await.unwrap();
    assert_eq!(history[0].status, MinedBlockStatus::MainChain);
    assert!(!history[0].paid);
    assert!(r.node.broadcast_txs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_hash_counts_as_error() {
    let r = rig(None);
    let mut block = mined(1, &[1], 1);
    block.hash = "not-hex".into();
    r.store.add_mined_block(&block).await.unwrap();

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(summary, SweepSummary { errors: 1, ..Default::default() });
    assert_eq!(r.store.mined_blocks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn overlapping_sweep_is_skipped() {
    let r = rig(None);
    r.node.lookup_delay_ms.store(100, Ordering::SeqCst);
    r.store.add_mined_block(&mined(1, &[1], 1)).await.unwrap();

    let (first, second) = tokio::join!(r.banker.sweep(), r.banker.sweep());
    assert_eq!(first.map(|s| s.waiting), Some(1));
    assert_eq!(second, None);

    assert!(r.banker.sweep().await.is_some());
}

// ---------------------------------------------------------------------------
// Nonces
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nonce_skips_outgoing_pool() {
    let r = rig(None);
    *r.node.account.lock().unwrap() = Some(Account { balance: 0, nonce: 4 });
    assert_eq!(r.banker.next_nonce().await.unwrap(), 5);

    *r.node.out_pending.lock().unwrap() = vec![SignedTx::unsigned_for_tests(UnsignedTx {
        from: r.signer.address().to_string(),
        to: address(1),
        amount: 1,
        fee: 1,
        nonce: 9,
    })];
    assert_eq!(r.banker.next_nonce().await.unwrap(), 10);

    r.store.add_mined_block(&mined(1, &[30, 70], 100)).await.unwrap();
    r.node.place(hash(1), BlockStatus::MainChain, false, Some(10));
    r.banker.sweep().await.unwrap();
    assert_eq!(nonces(&r.node.pooled_txs.lock().unwrap()), vec![10, 11]);

    assert_eq!(r.banker.next_nonce().await.unwrap(), 12);
}

#[tokio::test]
async fn evicted_transfer_frees_its_nonce() {
    let r = rig(None);
    *r.node.account.lock().unwrap() = Some(Account { balance: 0, nonce: 4 });
    r.store.add_mined_block(&mined(1, &[1], 1)).await.unwrap();
    r.node.place(hash(1), BlockStatus::MainChain, false, Some(10));

    r.banker.sweep().await.unwrap();
    assert_eq!(nonces(&r.node.pooled_txs.lock().unwrap()), vec![5]);

    // The pool dropped the transfer before it reached the chain.
    r.node.out_pending.lock().unwrap().clear();
    assert_eq!(r.banker.next_nonce().await.unwrap(), 5);
}

#[tokio::test]
async fn outcome_is_reported_per_block() {
    let r = rig(None);
    r.store.add_mined_block(&mined(1, &[1], 1)).await.unwrap();
    r.store.add_mined_block(&mined(2, &[1], 1)).await.unwrap();
    r.store.add_mined_block(&mined(3, &[1], 1)).await.unwrap();
    r.node.place(hash(1), BlockStatus::MainChain, false, Some(10));
    r.node.place(hash(2), BlockStatus::Block, false, Some(10));
    r.node.place(hash(3), BlockStatus::MainChain, false, Some(995));

    let summary = r.banker.sweep().await.unwrap();
    assert_eq!(
        summary,
        SweepSummary {
            paid: 1,
            orphaned: 1,
            waiting: 1,
            ..Default::default()
        }
    );
    let left = r.store.mined_blocks().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].hash, hash(3).to_hex());
}
