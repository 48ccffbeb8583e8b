//! Authenticated encryption with associated data.
//!
//! ChaCha20-Poly1305: 32-byte key, 12-byte nonce, 16-byte tag. The nonce
//! is always derived from the message key (see `kdf::cipher_params`),
//! never random, so it is a caller argument rather than a prefix.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};

use crate::error::CryptoError;

/// Encrypt `plaintext` under `key`/`nonce`, authenticating `aad`.
/// Returns ciphertext with the 16-byte tag appended.
pub fn seal(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt and authenticate. Tag mismatch maps to `DecryptionFailed`.
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [1u8; 32];
        let nonce = [2u8; 12];
        let ct = seal(&key, &nonce, b"payload", b"aad").unwrap();
        assert_eq!(ct.len(), 7 + 16);
        let pt = open(&key, &nonce, &ct, b"aad").unwrap();
        assert_eq!(pt, b"payload");
    }

    #[test]
    fn open_rejects_wrong_aad() {
        let key = [1u8; 32];
        let nonce = [2u8; 12];
        let ct = seal(&key, &nonce, b"payload", b"aad").unwrap();
        let err = open(&key, &nonce, &ct, b"other").unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn open_rejects_truncated_ciphertext() {
        let key = [1u8; 32];
        let nonce = [2u8; 12];
        let ct = seal(&key, &nonce, b"payload", b"").unwrap();
        let err = open(&key, &nonce, &ct[..ct.len() - 1], b"").unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }
}
