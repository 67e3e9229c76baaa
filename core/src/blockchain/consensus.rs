/// Difficulty targets and reward helpers.
///
/// Difficulty is a probability in (0, 1]: the chance that one hash attempt
/// lands at or below the target. The target is `floor(p * 2^256)` clamped to
/// the 256-bit range and compared against digests as a big-endian integer.
use num_bigint::BigUint;
use num_traits::{Float, One, Zero};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Pool shares are `POOL_SOLUTION_SPACE` times easier than the block itself.
pub const POOL_SOLUTION_SPACE: f64 = 200.0;

/// Mean network block interval in seconds, expressed as a half-life.
pub const MEAN_BLOCK_TIME_SECS: f64 = 15.0 / std::f64::consts::LN_2;

/// Uncles deeper than this earn nothing.
pub const MAX_UNCLE_DEPTH: u64 = 8;

/// Big-endian 256-bit target.
pub type Target = [u8; 32];

/// Chain-side classification of a block, as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Rejected,
    Nothing,
    Header,
    Block,
    MainChain,
}

// ---------------------------------------------------------------------------
// Target Calculations
// ---------------------------------------------------------------------------

/// Convert a success probability into its 256-bit target.
///
/// Non-positive or NaN difficulties yield the zero target; anything at or
/// above 1 yields the maximum target.
pub fn target_from_difficulty(difficulty: f64) -> Target {
    if difficulty.is_nan() || difficulty <= 0.0 {
        return [0u8; 32];
    }
    let max = (BigUint::one() << 256usize) - BigUint::one();
    if difficulty >= 1.0 {
        return to_target_bytes(&max);
    }

    let (mantissa, exponent, _sign) = Float::integer_decode(difficulty);
    let shift = 256i32 + i32::from(exponent);
    let mut target = BigUint::from(mantissa);
    target = if shift >= 0 {
        target << shift as usize
    } else {
        target >> (-shift) as usize
    };
    if target > max {
        target = max;
    }
    to_target_bytes(&target)
}

fn to_target_bytes(value: &BigUint) -> Target {
    let mut out = [0u8; 32];
    if value.is_zero() {
        return out;
    }
    let bytes = value.to_bytes_be();
    let len = bytes.len().min(32);
    out[32 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    out
}

/// Digest meets target when, read big-endian, it is less than or equal to it.
/// Shorter digests are right-aligned (treated as having leading zeros).
pub fn acceptable(digest: &[u8], target: &Target) -> bool {
    let mut padded = [0u8; 32];
    let len = digest.len().min(32);
    padded[32 - len..].copy_from_slice(&digest[digest.len() - len..]);
    padded <= *target
}

/// The easier difficulty a share has to meet, capped at 1.
pub fn pool_difficulty(block_difficulty: f64, solution_space: f64) -> f64 {
    (block_difficulty * solution_space).min(1.0)
}

/// Most-significant 8 bytes of the target as hex, the form miners are sent.
pub fn target_hex_prefix(target: &Target) -> String {
    hex::encode(&target[..8])
}

/// Expected hashes per second the network spends on a block of this difficulty.
pub fn network_hashrate(difficulty: f64) -> f64 {
    if difficulty <= 0.0 || !difficulty.is_finite() {
        return 0.0;
    }
    1.0 / difficulty / MEAN_BLOCK_TIME_SECS
}

/// Reward paid to an uncle found `depth` blocks below the nephew.
pub fn uncle_reward(block_reward: u64, depth: u64) -> u64 {
    if depth == 0 || depth >= MAX_UNCLE_DEPTH {
        return 0;
    }
    let scaled = u128::from(block_reward) * u128::from(MAX_UNCLE_DEPTH - depth)
        / u128::from(MAX_UNCLE_DEPTH);
    scaled as u64
}
