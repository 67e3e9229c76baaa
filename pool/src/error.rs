use thiserror::Error;

/// Why a submitted share was not credited.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitRejection {
    #[error("nonce must be 16 hex characters")]
    BadNonce,
    #[error("job {0} not found")]
    UnknownJob(u32),
    #[error("worker {0} is not authorized")]
    UnknownWorker(String),
    #[error("share does not meet pool target")]
    LowDifficulty,
    #[error("hash computation failed: {0}")]
    HashFailed(String),
}

/// Failures while paying out one mined block.
#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("mined block {hash} is inconsistent: {reason}")]
    Integrity { hash: String, reason: String },
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("transfer submission failed: {0}")]
    Submission(#[from] anyhow::Error),
}
