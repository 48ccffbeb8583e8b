//! Device identity and prekey material.
//!
//! Each device owns one long-term Ed25519 signing keypair. Its X25519
//! identity keypair for DH is derived deterministically from the signing
//! seed (bytes 0..32 of SHA-512(seed), clamped per RFC 7748 §5), so the
//! device publishes exactly one trust anchor.
//!
//! Prekeys
//! -------
//! - Signed prekey (SPK): X25519, rotated on demand, public half signed
//!   by the identity Ed25519 key.
//! - One-time prekeys (OTK): X25519, consumed at most once. Published in
//!   batches; the responder deletes an OTK from the pool the first time
//!   a handshake references its id.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::random;
use crate::x3dh::{OneTimePrekeyPublic, PrekeyBundle};

/// Derive the X25519 identity keypair from an Ed25519 seed.
pub(crate) fn x25519_from_seed(seed: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let mut h = Sha512::digest(seed);
    // Clamp as per RFC 7748 §5
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut private = [0u8; 32];
    private.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    let public = X25519Public::from(&StaticSecret::from(private)).to_bytes();
    (private, public)
}

// ── Signed prekey ────────────────────────────────────────────────────────────

/// Medium-lived X25519 pair whose public half is signed by the identity key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SignedPrekey {
    pub public: [u8; 32],
    pub(crate) private: [u8; 32],
    /// Raw Ed25519 signature over `public`.
    pub signature: Vec<u8>,
}

impl SignedPrekey {
    fn generate(signing: &SigningKey) -> Self {
        let private = random::bytes32();
        let public = X25519Public::from(&StaticSecret::from(private)).to_bytes();
        let signature = signing.sign(&public).to_bytes().to_vec();
        Self { public, private, signature }
    }
}

// ── One-time prekey ──────────────────────────────────────────────────────────

/// Pool entry. `id` is an opaque identifier unique within the device.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct OneTimePrekey {
    pub id: String,
    pub public: [u8; 32],
    pub(crate) private: [u8; 32],
}

// ── Device ───────────────────────────────────────────────────────────────────

/// One per device, immutable identity after creation.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Device {
    pub(crate) signing_private: [u8; 32],
    pub(crate) signing_public: [u8; 32],
    pub(crate) dh_private: [u8; 32],
    pub(crate) dh_public: [u8; 32],
    pub(crate) signed_prekey: SignedPrekey,
    /// Insertion-ordered pool; entries are removed when consumed.
    pub(crate) one_time: Vec<OneTimePrekey>,
}

impl Device {
    /// Create a device: fresh signing seed, derived DH pair, first
    /// signed prekey. Reads 64 bytes from the process randomness source
    /// (32 for the seed, 32 for the signed prekey).
    pub fn generate() -> Self {
        let seed = random::bytes32();
        let signing = SigningKey::from_bytes(&seed);
        let signing_public = signing.verifying_key().to_bytes();
        let (dh_private, dh_public) = x25519_from_seed(&seed);
        let signed_prekey = SignedPrekey::generate(&signing);
        Self {
            signing_private: seed,
            signing_public,
            dh_private,
            dh_public,
            signed_prekey,
            one_time: Vec::new(),
        }
    }

    /// Atomically replace the current signed prekey with a fresh pair.
    pub fn rotate_signed_prekey(&mut self) {
        let signing = SigningKey::from_bytes(&self.signing_private);
        self.signed_prekey = SignedPrekey::generate(&signing);
    }

    /// Publish a bundle carrying `count` freshly generated one-time
    /// prekeys (negative counts normalise to zero). The private halves
    /// stay in the pool until a responder consumes them.
    pub fn publish_prekey_bundle(&mut self, count: i32) -> PrekeyBundle {
        let count = count.max(0) as usize;
        let mut publics = Vec::with_capacity(count);
        for _ in 0..count {
            let private = random::bytes32();
            let public = X25519Public::from(&StaticSecret::from(private)).to_bytes();
            let id = uuid::Uuid::new_v4().to_string();
            publics.push(OneTimePrekeyPublic { id: id.clone(), public });
            self.one_time.push(OneTimePrekey { id, public, private });
        }
        PrekeyBundle {
            identity_key: self.dh_public,
            identity_signature_key: self.signing_public.to_vec(),
            signed_prekey: self.signed_prekey.public,
            signed_prekey_sig: self.signed_prekey.signature.clone(),
            one_time_prekeys: publics,
        }
    }

    /// Remove and return the one-time prekey with the given id.
    /// Consumption is destructive; a second call returns `None`.
    pub fn take_one_time_prekey(&mut self, id: &str) -> Option<OneTimePrekey> {
        let pos = self.one_time.iter().position(|k| k.id == id)?;
        Some(self.one_time.remove(pos))
    }

    /// Sign arbitrary bytes with the identity key.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        SigningKey::from_bytes(&self.signing_private)
            .sign(msg)
            .to_bytes()
            .to_vec()
    }

    pub fn signing_public(&self) -> &[u8; 32] {
        &self.signing_public
    }

    pub fn dh_public(&self) -> &[u8; 32] {
        &self.dh_public
    }

    pub fn signed_prekey(&self) -> &SignedPrekey {
        &self.signed_prekey
    }

    pub fn one_time_pool_len(&self) -> usize {
        self.one_time.len()
    }
}

/// Verify an Ed25519 signature made by `public_bytes` over `msg`.
pub fn verify_signature(
    public_bytes: &[u8],
    msg: &[u8],
    sig_bytes: &[u8],
) -> Result<(), CryptoError> {
    let vk = VerifyingKey::from_bytes(
        public_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("signing key must be 32 bytes".into()))?,
    )
    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let sig = Signature::from_bytes(
        sig_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("signature must be 64 bytes".into()))?,
    );
    vk.verify(msg, &sig)
        .map_err(|_| CryptoError::InvalidPrekeySignature)
}
