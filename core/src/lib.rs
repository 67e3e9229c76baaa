//! Core types shared by the Tidepool services: block headers and their
//! proof-of-work encoding, difficulty targets, addresses and payout transfers.

pub mod blockchain;
pub mod crypto;
pub mod pow;
pub mod tx;

pub use blockchain::block::{Block, BlockHeader, Hash};
pub use blockchain::consensus::Target;
