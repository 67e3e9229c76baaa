/// Proof-of-work input layout and the reference hasher.
///
/// A miner hashes the 64-byte pre-hash followed by the 8-byte little-endian
/// nonce (low 32 bits first, then high 32 bits).
use crate::blockchain::block::PRE_HASH_LEN;

pub const NONCE_HEX_LEN: usize = 16;
pub const WORK_INPUT_LEN: usize = PRE_HASH_LEN + 8;

#[derive(Debug, thiserror::Error)]
pub enum PowError {
    #[error("hasher failure: {0}")]
    Hasher(String),
}

/// Fixed-input proof-of-work hash function.
pub trait PowHasher: Send + Sync {
    fn hash(&self, input: &[u8; WORK_INPUT_LEN]) -> Result<[u8; 32], PowError>;
}

/// Blake3 over the work input. Used when no dedicated hasher is plugged in.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Hasher;

impl PowHasher for Blake3Hasher {
    fn hash(&self, input: &[u8; WORK_INPUT_LEN]) -> Result<[u8; 32], PowError> {
        Ok(blake3_work(input))
    }
}

pub fn blake3_work(input: &[u8]) -> [u8; 32] {
    blake3::hash(input).into()
}

pub fn work_input(pre_hash: &[u8; PRE_HASH_LEN], nonce: u64) -> [u8; WORK_INPUT_LEN] {
    let mut input = [0u8; WORK_INPUT_LEN];
    input[..PRE_HASH_LEN].copy_from_slice(pre_hash);
    input[PRE_HASH_LEN..PRE_HASH_LEN + 4].copy_from_slice(&(nonce as u32).to_le_bytes());
    input[PRE_HASH_LEN + 4..].copy_from_slice(&((nonce >> 32) as u32).to_le_bytes());
    input
}

/// Parse a submitted nonce: exactly 16 hex chars, bytes read little-endian.
pub fn parse_nonce_hex(nonce: &str) -> Option<u64> {
    if nonce.len() != NONCE_HEX_LEN {
        return None;
    }
    let bytes = hex::decode(nonce).ok()?;
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_le_bytes(arr))
}

pub fn nonce_to_hex(nonce: u64) -> String {
    hex::encode(nonce.to_le_bytes())
}
