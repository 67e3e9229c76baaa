use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::pow;
use crate::tx::SignedTx;

/// Length of the header digest that miners extend with a nonce.
pub const PRE_HASH_LEN: usize = 64;

/// 32-byte block/transaction identifier, serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HashParseError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

impl Hash {
    pub fn digest(data: &[u8]) -> Self {
        Hash(blake3::hash(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, HashParseError> {
        let bytes = hex::decode(s).map_err(|e| HashParseError::Hex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashParseError::Length(bytes.len()))?;
        Ok(Hash(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Block header. `nonce` stays `None` until a miner solves the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub previous_hash: Vec<Hash>,
    pub merkle_root: Hash,
    pub state_root: Hash,
    /// Probability in (0, 1] that a single hash attempt solves the block.
    pub difficulty: f64,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub nonce: Option<u64>,
    pub miner: String,
}

impl BlockHeader {
    /// Bytes covered by the pre-hash: every field except the nonce.
    fn prehash_preimage(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 * (self.previous_hash.len() + 2) + 64);
        data.extend_from_slice(&(self.previous_hash.len() as u32).to_le_bytes());
        for parent in &self.previous_hash {
            data.extend_from_slice(parent.as_bytes());
        }
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(self.state_root.as_bytes());
        data.extend_from_slice(&self.difficulty.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(self.miner.as_bytes());
        data
    }

    /// 64-byte header digest handed to miners. Independent of the nonce.
    pub fn pre_hash(&self) -> [u8; PRE_HASH_LEN] {
        let mut out = [0u8; PRE_HASH_LEN];
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.prehash_preimage());
        hasher.finalize_xof().fill(&mut out);
        out
    }

    /// Block identity: the reference proof-of-work digest of pre-hash + nonce.
    /// An unsolved header hashes with nonce zero.
    pub fn hash(&self) -> Hash {
        let input = pow::work_input(&self.pre_hash(), self.nonce.unwrap_or(0));
        Hash(pow::blake3_work(&input))
    }

    pub fn primary_parent(&self) -> Option<&Hash> {
        self.previous_hash.first()
    }
}

/// Complete block (header + transfers)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<SignedTx>,
}

impl Block {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Binary merkle tree over transfer hashes; an odd node is paired with itself.
    pub fn calculate_merkle_root(txs: &[SignedTx]) -> Hash {
        if txs.is_empty() {
            return Hash::default();
        }
        let mut level: Vec<Hash> = txs.iter().map(SignedTx::hash).collect();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| {
                    let left = pair[0];
                    let right = pair.get(1).copied().unwrap_or(left);
                    let mut data = [0u8; 64];
                    data[..32].copy_from_slice(left.as_bytes());
                    data[32..].copy_from_slice(right.as_bytes());
                    Hash::digest(&data)
                })
                .collect();
        }
        level[0]
    }
}
