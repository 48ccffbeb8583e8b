//! sm_crypto — SecuMSG cryptographic protocol engine
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - The cipher suite is fixed (X25519 / Ed25519 / HKDF-SHA256 /
//!   ChaCha20-Poly1305); there is no negotiation.
//!
//! # Module layout
//! - `device`   — device identity, signed prekey rotation, one-time prekey pool
//! - `x3dh`     — X3DH handshake (initiator + responder secret derivation)
//! - `ratchet`  — Double Ratchet sessions with skipped message keys
//! - `snapshot` — stable serialization of device and session state
//! - `aead`     — ChaCha20-Poly1305 seal/open helpers
//! - `kdf`      — HKDF / HMAC chain derivations
//! - `random`   — process-wide entropy source with a test-only override
//! - `error`    — unified error type

pub mod aead;
pub mod b64;
pub mod device;
pub mod error;
pub mod kdf;
pub mod random;
pub mod ratchet;
pub mod snapshot;
pub mod x3dh;

pub use error::CryptoError;
