use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Prekey signature verification failed")]
    InvalidPrekeySignature,

    #[error("One-time prekey {0} is not in the pool")]
    MissingOneTimeKey(String),

    #[error("Send ratchet cannot rotate before the peer ratchet key is known")]
    InvalidRemoteKey,

    #[error("Message {0} was already consumed by this receive chain")]
    DuplicateMessage(u32),

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    DecryptionFailed,

    #[error("AEAD encryption failed")]
    EncryptionFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Snapshot decode failed: {0}")]
    Snapshot(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
