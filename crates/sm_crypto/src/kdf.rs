//! Key derivation for the SecuMSG suite.
//!
//! Three HKDF-SHA256 domains, separated by info string:
//!   - `SecuMSG-X3DH` — handshake secret → (root key, first chain key)
//!   - `SecuMSG-DR`   — DH ratchet output → (new root, new chain)
//!   - `SecuMSG-AEAD` — message key → (cipher key, nonce)
//!
//! The symmetric chain advances with HMAC-SHA256 over single domain
//! bytes: 0x01 for the next chain key, 0x02 for the message key.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;

pub const X3DH_INFO: &[u8] = b"SecuMSG-X3DH";
pub const ROOT_INFO: &[u8] = b"SecuMSG-DR";
pub const AEAD_INFO: &[u8] = b"SecuMSG-AEAD";

type HmacSha256 = Hmac<Sha256>;

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
/// `salt` may be `None` (HKDF then uses a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the initial (root_key, chain_key) pair from the X3DH secret.
pub fn handshake_keys(secret: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mut okm = [0u8; 64];
    hkdf_expand(secret, None, X3DH_INFO, &mut okm)?;
    Ok(split64(&okm))
}

/// KDF_RK: mix a DH ratchet output into the root key.
/// Returns (new_root_key, new_chain_key).
pub fn kdf_root(root: &[u8; 32], dh_output: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mut okm = [0u8; 64];
    hkdf_expand(dh_output, Some(root), ROOT_INFO, &mut okm)?;
    Ok(split64(&okm))
}

/// KDF_CK: advance a chain key one step.
/// Returns (next_chain_key, message_key).
pub fn chain_step(ck: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mut mac_ck = HmacSha256::new_from_slice(ck)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac_ck.update(&[0x01]);
    let next_ck: [u8; 32] = mac_ck.finalize().into_bytes().into();

    let mut mac_mk = HmacSha256::new_from_slice(ck)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac_mk.update(&[0x02]);
    let mk: [u8; 32] = mac_mk.finalize().into_bytes().into();

    Ok((next_ck, mk))
}

/// Derive the AEAD key and nonce for one message key.
pub fn cipher_params(mk: &[u8; 32]) -> Result<([u8; 32], [u8; 12]), CryptoError> {
    let mut okm = [0u8; 44];
    hkdf_expand(mk, None, AEAD_INFO, &mut okm)?;
    let mut key = [0u8; 32];
    let mut nonce = [0u8; 12];
    key.copy_from_slice(&okm[..32]);
    nonce.copy_from_slice(&okm[32..]);
    Ok((key, nonce))
}

fn split64(okm: &[u8; 64]) -> ([u8; 32], [u8; 32]) {
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_step_is_deterministic_and_diverging() {
        let ck = [7u8; 32];
        let (next_a, mk_a) = chain_step(&ck).unwrap();
        let (next_b, mk_b) = chain_step(&ck).unwrap();
        assert_eq!(next_a, next_b);
        assert_eq!(mk_a, mk_b);
        assert_ne!(next_a, mk_a, "chain key and message key domains must differ");
    }

    #[test]
    fn cipher_params_split() {
        let (key, nonce) = cipher_params(&[42u8; 32]).unwrap();
        assert_ne!(key, [0u8; 32]);
        assert_ne!(nonce, [0u8; 12]);
    }
}
