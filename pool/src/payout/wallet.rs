/// Pool payout wallet
///
/// Holds the banker's Ed25519 key and signs payout transfers in-process.
/// The secret never leaves the pool; the node only ever sees signed
/// transfers.

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey};
use tidepool_core::crypto::keys;
use tidepool_core::tx::{SignedTx, UnsignedTx};

/// Signing collaborator for payout transfers.
pub trait TxSigner: Send + Sync {
    /// Sending address of every transfer this signer produces.
    fn address(&self) -> &str;

    fn sign(&self, tx: UnsignedTx) -> Result<SignedTx>;
}

pub struct Ed25519Signer {
    signing_key: SigningKey,
    address: String,
    public_key_hex: String,
}

impl Ed25519Signer {
    /// From a 64-char hex secret key (raw 32-byte Ed25519 seed).
    pub fn from_hex(secret_key_hex: &str) -> Result<Self> {
        let sk_bytes = hex::decode(secret_key_hex.trim())
            .map_err(|_| anyhow!("Invalid banker secret key hex"))?;
        let secret: [u8; 32] = sk_bytes.as_slice().try_into().map_err(|_| {
            anyhow!(
                "Banker secret key must be 32 bytes (64 hex chars), got {}",
                sk_bytes.len()
            )
        })?;
        Ok(Self::from_bytes(&secret))
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let public_key = signing_key.verifying_key();
        let address = keys::address_from_public_key(public_key.as_bytes());
        let public_key_hex = hex::encode(public_key.as_bytes());

        tracing::info!(
            "🔑 Banker wallet initialized: address={}, pubkey={}...",
            address,
            &public_key_hex[..16]
        );

        Self {
            signing_key,
            address,
            public_key_hex,
        }
    }
}

impl TxSigner for Ed25519Signer {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, tx: UnsignedTx) -> Result<SignedTx> {
        if tx.from != self.address {
            return Err(anyhow!("transfer from {} cannot be signed by {}", tx.from, self.address));
        }
        let signature = self.signing_key.sign(&tx.signing_bytes());
        Ok(SignedTx {
            tx,
            public_key: self.public_key_hex.clone(),
            signature: hex::encode(signature.to_bytes()),
        })
    }
}
