use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Human-readable prefix of every account address.
pub const ADDRESS_PREFIX: &str = "tide1";

const BODY_LEN: usize = 32;
const CHECKSUM_LEN: usize = 4;
pub const ADDRESS_LEN: usize = 5 + BODY_LEN + CHECKSUM_LEN;

const BASE32_ALPHABET: &[u8; 32] = b"023456789acdefghjklmnpqrstuvwxyz";

/// Pack bytes into 5-bit groups, most significant bits first.
fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8 + 4) / 5);
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for &byte in bytes {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((acc << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ADDRESS_PREFIX.as_bytes());
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    base32_encode(&digest[..3])[..CHECKSUM_LEN].to_string()
}

/// `tide1` + base32(ripemd160(sha256(pubkey))) + 4-char checksum.
pub fn address_from_public_key(public_key: &[u8]) -> String {
    let key_hash = Ripemd160::digest(Sha256::digest(public_key));
    let body = base32_encode(key_hash.as_slice());
    let ck = checksum(&body);
    format!("{ADDRESS_PREFIX}{body}{ck}")
}

/// Prefix, length, alphabet and checksum must all match.
pub fn is_valid_address(address: &str) -> bool {
    let Some(rest) = address.strip_prefix(ADDRESS_PREFIX) else {
        return false;
    };
    if address.len() != ADDRESS_LEN {
        return false;
    }
    if !rest.bytes().all(|b| BASE32_ALPHABET.contains(&b)) {
        return false;
    }
    let (body, ck) = rest.split_at(BODY_LEN);
    checksum(body) == ck
}

pub fn verify(public_key: &[u8], msg: &[u8], signature: &[u8]) -> bool {
    let Ok(pk) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&pk) else {
        return false;
    };
    let Ok(sig) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    key.verify(msg, &Signature::from_bytes(&sig)).is_ok()
}
