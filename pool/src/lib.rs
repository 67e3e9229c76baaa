// Tidepool: pooled proof-of-work mining control plane.
//
// Stratum coordinator, candidate producer and reward banker, bridged by a
// put-work / submit-work channel.

pub mod api;
pub mod blockchain;
pub mod channel;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod payout;
pub mod producer;
pub mod store;
pub mod stratum;
pub mod workers;
