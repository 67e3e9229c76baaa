use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};
use std::sync::OnceLock;

static SHARES_ACCEPTED: OnceLock<IntCounter> = OnceLock::new();
static SHARES_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();
static BLOCKS_FOUND: OnceLock<IntCounter> = OnceLock::new();
static JOBS_ISSUED: OnceLock<IntCounter> = OnceLock::new();
static CANDIDATES_BUILT: OnceLock<IntCounter> = OnceLock::new();

static RPC_REQUESTS: OnceLock<IntCounter> = OnceLock::new();
static RPC_ERRORS: OnceLock<IntCounter> = OnceLock::new();
static REDIS_ERRORS: OnceLock<IntCounter> = OnceLock::new();

static PAYOUTS_SENT: OnceLock<IntCounter> = OnceLock::new();
static PAYOUTS_FAILED: OnceLock<IntCounter> = OnceLock::new();
static PAYOUT_SWEEPS: OnceLock<IntCounter> = OnceLock::new();
static MINED_BLOCKS_ARCHIVED: OnceLock<IntCounterVec> = OnceLock::new();

static ACTIVE_CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();
static AUTHORIZED_WORKERS: OnceLock<IntGauge> = OnceLock::new();
static POOL_HASHRATE: OnceLock<Gauge> = OnceLock::new();

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("valid counter definition")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::new(name, help).expect("valid gauge definition")
}

fn shares_accepted() -> &'static IntCounter {
    SHARES_ACCEPTED.get_or_init(|| counter("shares_accepted_total", "Total accepted shares"))
}

fn shares_rejected() -> &'static IntCounterVec {
    SHARES_REJECTED.get_or_init(|| {
        IntCounterVec::new(
            Opts::new("shares_rejected_total", "Rejected shares by reason"),
            &["reason"],
        )
        .expect("valid counter definition")
    })
}

fn blocks_found() -> &'static IntCounter {
    BLOCKS_FOUND.get_or_init(|| counter("blocks_found_total", "Shares that solved the block target"))
}

fn jobs_issued() -> &'static IntCounter {
    JOBS_ISSUED.get_or_init(|| counter("jobs_issued_total", "Jobs created from put-work messages"))
}

fn candidates_built() -> &'static IntCounter {
    CANDIDATES_BUILT.get_or_init(|| counter("candidates_built_total", "Candidate blocks published"))
}

fn rpc_requests() -> &'static IntCounter {
    RPC_REQUESTS.get_or_init(|| counter("rpc_requests_total", "Total RPC requests to the node"))
}

fn rpc_errors() -> &'static IntCounter {
    RPC_ERRORS.get_or_init(|| counter("rpc_errors_total", "Total RPC errors"))
}

fn redis_errors() -> &'static IntCounter {
    REDIS_ERRORS.get_or_init(|| counter("redis_errors_total", "Total Redis command failures"))
}

fn payouts_sent() -> &'static IntCounter {
    PAYOUTS_SENT.get_or_init(|| counter("payouts_sent_total", "Payout transfers submitted"))
}

fn payouts_failed() -> &'static IntCounter {
    PAYOUTS_FAILED.get_or_init(|| counter("payouts_failed_total", "Mined blocks whose payout failed"))
}

fn payout_sweeps() -> &'static IntCounter {
    PAYOUT_SWEEPS.get_or_init(|| counter("payout_sweeps_total", "Completed banker sweeps"))
}

fn mined_blocks_archived() -> &'static IntCounterVec {
    MINED_BLOCKS_ARCHIVED.get_or_init(|| {
        IntCounterVec::new(
            Opts::new("mined_blocks_archived_total", "Mined blocks moved to history by status"),
            &["status"],
        )
        .expect("valid counter definition")
    })
}

fn active_connections() -> &'static IntGauge {
    ACTIVE_CONNECTIONS.get_or_init(|| gauge("stratum_active_connections", "Open stratum connections"))
}

fn authorized_workers() -> &'static IntGauge {
    AUTHORIZED_WORKERS.get_or_init(|| gauge("stratum_authorized_workers", "Authorized workers"))
}

fn pool_hashrate() -> &'static Gauge {
    POOL_HASHRATE.get_or_init(|| {
        Gauge::new("pool_hashrate", "Smoothed pool hash rate (H/s)").expect("valid gauge definition")
    })
}

pub fn inc_shares_accepted() {
    shares_accepted().inc();
}

pub fn inc_shares_rejected(reason: &str) {
    shares_rejected().with_label_values(&[reason]).inc();
}

pub fn inc_blocks_found() {
    blocks_found().inc();
}

pub fn inc_jobs_issued() {
    jobs_issued().inc();
}

pub fn inc_candidates_built() {
    candidates_built().inc();
}

pub fn inc_rpc_requests() {
    rpc_requests().inc();
}

pub fn inc_rpc_errors() {
    rpc_errors().inc();
}

pub fn inc_redis_errors() {
    redis_errors().inc();
}

pub fn inc_payouts_sent(n: u64) {
    payouts_sent().inc_by(n);
}

pub fn inc_payouts_failed() {
    payouts_failed().inc();
}

pub fn inc_payout_sweeps() {
    payout_sweeps().inc();
}

pub fn inc_mined_blocks_archived(status: &str) {
    mined_blocks_archived().with_label_values(&[status]).inc();
}

pub fn inc_active_connections() {
    active_connections().inc();
}

pub fn dec_active_connections() {
    active_connections().dec();
}

pub fn set_authorized_workers(n: usize) {
    authorized_workers().set(n as i64);
}

pub fn set_pool_hashrate(h: f64) {
    pool_hashrate().set(h);
}

pub fn render() -> String {
    let enc = TextEncoder::new();
    let mut mfs = Vec::new();

    mfs.extend(shares_accepted().collect());
    mfs.extend(shares_rejected().collect());
    mfs.extend(blocks_found().collect());
    mfs.extend(jobs_issued().collect());
    mfs.extend(candidates_built().collect());
    mfs.extend(rpc_requests().collect());
    mfs.extend(rpc_errors().collect());
    mfs.extend(redis_errors().collect());
    mfs.extend(payouts_sent().collect());
    mfs.extend(payouts_failed().collect());
    mfs.extend(payout_sweeps().collect());
    mfs.extend(mined_blocks_archived().collect());
    mfs.extend(active_connections().collect());
    mfs.extend(authorized_workers().collect());
    mfs.extend(pool_hashrate().collect());

    let mut buf = Vec::new();
    let _ = enc.encode(&mfs, &mut buf);
    String::from_utf8(buf).unwrap_or_default()
}
