pub mod banker;
pub mod distribution;
pub mod wallet;

pub use banker::{Banker, BlockOutcome, SweepSummary};
pub use distribution::{Allocation, PayoutPlan};
pub use wallet::{Ed25519Signer, TxSigner};
