use serde::{Deserialize, Serialize};

use crate::blockchain::block::Hash;
use crate::crypto::keys;

/// Base units per coin.
pub const COIN: u64 = 1_000_000_000;

/// Account-model transfer before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTx {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub fee: u64,
    pub nonce: u64,
}

impl UnsignedTx {
    /// Message bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.from.len() + self.to.len() + 24);
        data.extend_from_slice(self.from.as_bytes());
        data.push(0);
        data.extend_from_slice(self.to.as_bytes());
        data.push(0);
        data.extend_from_slice(&self.amount.to_le_bytes());
        data.extend_from_slice(&self.fee.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data
    }

    pub fn hash(&self) -> Hash {
        Hash::digest(&self.signing_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub tx: UnsignedTx,
    /// Hex encoded 32-byte Ed25519 public key
    pub public_key: String,
    /// Hex encoded 64-byte Ed25519 signature
    pub signature: String,
}

impl SignedTx {
    pub fn nonce(&self) -> u64 {
        self.tx.nonce
    }

    pub fn hash(&self) -> Hash {
        self.tx.hash()
    }

    /// Signature is valid and the key derives the sending address.
    pub fn verify(&self) -> bool {
        let (Ok(pk), Ok(sig)) = (hex::decode(&self.public_key), hex::decode(&self.signature)) else {
            return false;
        };
        if keys::address_from_public_key(&pk) != self.tx.from {
            return false;
        }
        keys::verify(&pk, &self.tx.signing_bytes(), &sig)
    }

    #[doc(hidden)]
    pub fn unsigned_for_tests(tx: UnsignedTx) -> Self {
        Self {
            tx,
            public_key: String::new(),
            signature: String::new(),
        }
    }
}
