//! Double Ratchet sessions.
//!
//! Reference: <https://signal.org/docs/specifications/doubleratchet/>
//!
//! State separation (non-negotiable):
//!   root_key   — updated on every DH ratchet step
//!   send_chain — advanced once per outgoing message
//!   recv_chain — advanced once per incoming message
//!   message key — derived from a chain, used once, then gone
//!
//! DH rotation is split across directions: receiving a new peer ratchet
//! key rotates the receive chain and ZEROES the send chain, so the next
//! send generates a fresh keypair and performs the send-side rotation
//! lazily. Forward secrecy comes from deleting old chain and message
//! keys; post-compromise security from the DH rotations.
//!
//! Out-of-order frames are served from a bounded skipped-key cache:
//! insertion-ordered, keyed by the 36-byte `dh_public ∥ BE32(index)`
//! tuple, capped at [`MAX_SKIPPED`] entries with FIFO eviction.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::aead;
use crate::b64;
use crate::error::CryptoError;
use crate::kdf;
use crate::random;

/// Cache bound for skipped message keys per session.
pub const MAX_SKIPPED: usize = 64;

const ZERO_KEY: [u8; 32] = [0u8; 32];

// ── Roles ────────────────────────────────────────────────────────────────────

/// Which side of the handshake created this session. The role decides
/// only the initial chain assignment and the first ratchet keypair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

// ── Chain state ──────────────────────────────────────────────────────────────

/// One KDF chain: the current key plus the count of messages derived
/// from it so far.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize)]
pub struct ChainState {
    pub key: [u8; 32],
    pub index: u32,
}

impl ChainState {
    pub fn zero() -> Self {
        Self { key: ZERO_KEY, index: 0 }
    }

    pub fn is_zero(&self) -> bool {
        self.key == ZERO_KEY
    }
}

// ── Message header ───────────────────────────────────────────────────────────

/// Travels unencrypted with every ciphertext; bound to it as AEAD
/// associated data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Sender's current DH ratchet public key.
    #[serde(with = "b64::array")]
    pub dh_public: [u8; 32],
    /// Message count of the previous sending chain.
    pub pn: u32,
    /// Message number within the current sending chain.
    pub n: u32,
    /// AEAD nonce derived from the message key.
    #[serde(with = "b64::array")]
    pub nonce: [u8; 12],
}

impl MessageHeader {
    /// 40 bytes: dh_public(32) ∥ BE32(pn) ∥ BE32(n).
    pub fn associated_data(&self) -> [u8; 40] {
        let mut ad = [0u8; 40];
        ad[..32].copy_from_slice(&self.dh_public);
        ad[32..36].copy_from_slice(&self.pn.to_be_bytes());
        ad[36..40].copy_from_slice(&self.n.to_be_bytes());
        ad
    }
}

// ── Skipped keys ─────────────────────────────────────────────────────────────

fn skipped_key_id(dh_public: &[u8; 32], index: u32) -> [u8; 36] {
    let mut id = [0u8; 36];
    id[..32].copy_from_slice(dh_public);
    id[32..].copy_from_slice(&index.to_be_bytes());
    id
}

#[derive(Debug, Clone)]
pub(crate) struct SkippedKey {
    pub(crate) id: [u8; 36],
    pub(crate) message_key: [u8; 32],
}

// ── Session state ────────────────────────────────────────────────────────────

/// Complete Double Ratchet state for one conversation with one peer.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) root_key: [u8; 32],
    pub(crate) send_chain: ChainState,
    pub(crate) recv_chain: ChainState,
    /// Our current DH ratchet keypair; regenerated on each send rotation.
    pub(crate) ratchet_private: [u8; 32],
    pub(crate) ratchet_public: [u8; 32],
    /// Last known peer ratchet public key.
    pub(crate) remote_ratchet: [u8; 32],
    /// Peer identity DH public, kept for integrity checks.
    pub(crate) remote_identity: [u8; 32],
    /// Peer identity signing key bytes.
    pub(crate) remote_signature: Vec<u8>,
    /// Message count of the previous send chain at the last rotation.
    pub(crate) pn: u32,
    pub(crate) role: Role,
    /// One-time prekey id referenced by the initiating handshake.
    pub(crate) pending_prekey: Option<String>,
    /// Insertion-ordered cache, oldest first.
    pub(crate) skipped: VecDeque<SkippedKey>,
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.send_chain.zeroize();
        self.recv_chain.zeroize();
        self.ratchet_private.zeroize();
        for entry in self.skipped.iter_mut() {
            entry.message_key.zeroize();
        }
    }
}

impl SessionState {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn root_key(&self) -> &[u8; 32] {
        &self.root_key
    }

    pub fn ratchet_public(&self) -> &[u8; 32] {
        &self.ratchet_public
    }

    pub fn remote_identity(&self) -> &[u8; 32] {
        &self.remote_identity
    }

    pub fn pending_prekey(&self) -> Option<&str> {
        self.pending_prekey.as_deref()
    }

    /// A session is established once both chains have been populated,
    /// i.e. after the first successful exchange in each direction.
    pub fn is_established(&self) -> bool {
        !self.send_chain.is_zero() && !self.recv_chain.is_zero()
    }

    // ── Encrypt ──────────────────────────────────────────────────────────

    /// Encrypt one message. Advances the send chain; rotates the DH
    /// ratchet first if the send chain was zeroed by a receive rotation.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<(Vec<u8>, MessageHeader), CryptoError> {
        if self.send_chain.is_zero() {
            self.rotate_on_send()?;
        }

        let (next_chain, mk) = kdf::chain_step(&self.send_chain.key)?;
        let n = self.send_chain.index;
        self.send_chain = ChainState { key: next_chain, index: n + 1 };

        let (key, nonce) = kdf::cipher_params(&mk)?;
        let header = MessageHeader {
            dh_public: self.ratchet_public,
            pn: self.pn,
            n,
            nonce,
        };
        let ciphertext = aead::seal(&key, &nonce, plaintext, &header.associated_data())?;
        Ok((ciphertext, header))
    }

    fn rotate_on_send(&mut self) -> Result<(), CryptoError> {
        if self.remote_ratchet == ZERO_KEY {
            return Err(CryptoError::InvalidRemoteKey);
        }
        let secret = StaticSecret::from(random::bytes32());
        let public = X25519Public::from(&secret).to_bytes();
        let dh = secret.diffie_hellman(&X25519Public::from(self.remote_ratchet));

        let (root, chain) = kdf::kdf_root(&self.root_key, dh.as_bytes())?;
        self.root_key = root;
        self.pn = self.send_chain.index;
        self.send_chain = ChainState { key: chain, index: 0 };
        self.ratchet_private = secret.to_bytes();
        self.ratchet_public = public;
        Ok(())
    }

    // ── Decrypt ──────────────────────────────────────────────────────────

    /// Decrypt one frame.
    ///
    /// Handles three cases: a cached skipped key, a frame from the
    /// current receive chain (possibly skipping ahead), and a frame
    /// carrying a new peer ratchet key (DH rotation).
    ///
    /// No session state is committed unless the AEAD open succeeds:
    /// rotation and chain advancement are staged on a scratch copy, and
    /// a skipped entry is consumed only on success. Retrying the same
    /// `(header, ciphertext)` after a failure is therefore idempotent.
    pub fn decrypt(
        &mut self,
        ciphertext: &[u8],
        header: &MessageHeader,
    ) -> Result<Vec<u8>, CryptoError> {
        let ad = header.associated_data();

        // Case 1: a skipped key already exists for this frame.
        let cache_id = skipped_key_id(&header.dh_public, header.n);
        if let Some(pos) = self.skipped.iter().position(|e| e.id == cache_id) {
            let mk = self.skipped[pos].message_key;
            let (key, nonce) = kdf::cipher_params(&mk)?;
            let plaintext = aead::open(&key, &nonce, ciphertext, &ad)?;
            if let Some(mut entry) = self.skipped.remove(pos) {
                entry.message_key.zeroize();
            }
            return Ok(plaintext);
        }

        let mut staged = self.clone();

        // Case 3: new peer ratchet key — rotate the receive side.
        if header.dh_public != staged.remote_ratchet {
            staged.rotate_on_recv(header)?;
        }

        if header.n < staged.recv_chain.index {
            return Err(CryptoError::DuplicateMessage(header.n));
        }

        // Case 2: skip ahead, caching the keys of the frames in between.
        while staged.recv_chain.index < header.n {
            let (next_chain, mk) = kdf::chain_step(&staged.recv_chain.key)?;
            let index = staged.recv_chain.index;
            let remote = staged.remote_ratchet;
            staged.store_skipped(remote, index, mk);
            staged.recv_chain = ChainState { key: next_chain, index: index + 1 };
        }

        let (next_chain, mk) = kdf::chain_step(&staged.recv_chain.key)?;
        staged.recv_chain = ChainState {
            key: next_chain,
            index: staged.recv_chain.index + 1,
        };

        let (key, nonce) = kdf::cipher_params(&mk)?;
        let plaintext = aead::open(&key, &nonce, ciphertext, &ad)?;

        *self = staged;
        Ok(plaintext)
    }

    fn rotate_on_recv(&mut self, header: &MessageHeader) -> Result<(), CryptoError> {
        let dh = StaticSecret::from(self.ratchet_private)
            .diffie_hellman(&X25519Public::from(header.dh_public));
        let (root, chain) = kdf::kdf_root(&self.root_key, dh.as_bytes())?;
        self.root_key = root;
        self.remote_ratchet = header.dh_public;
        self.recv_chain = ChainState { key: chain, index: 0 };
        // Force the next send to rotate with a fresh keypair.
        self.send_chain = ChainState::zero();
        self.pn = header.pn;
        Ok(())
    }

    fn store_skipped(&mut self, remote: [u8; 32], index: u32, message_key: [u8; 32]) {
        self.skipped.push_back(SkippedKey {
            id: skipped_key_id(&remote, index),
            message_key,
        });
        while self.skipped.len() > MAX_SKIPPED {
            if let Some(mut evicted) = self.skipped.pop_front() {
                evicted.message_key.zeroize();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::x3dh::{accept_session, init_session};

    fn session_pair() -> (SessionState, SessionState) {
        let alice = Device::generate();
        let mut bob = Device::generate();
        let bundle = bob.publish_prekey_bundle(1);
        let (alice_session, handshake) = init_session(&alice, &bundle).unwrap();
        let bob_session = accept_session(&mut bob, &handshake).unwrap();
        (alice_session, bob_session)
    }

    #[test]
    fn roundtrip_with_rotations() {
        let (mut alice, mut bob) = session_pair();
        assert!(!alice.is_established());

        // Alice → Bob, three messages on the initial chain.
        for i in 0..3u32 {
            let msg = format!("a->b {i}");
            let (ct, header) = alice.encrypt(msg.as_bytes()).unwrap();
            assert_eq!(header.n, i);
            assert_eq!(bob.decrypt(&ct, &header).unwrap(), msg.as_bytes());
        }

        // Bob replies: triggers his send rotation, then Alice's receive
        // rotation. Both sessions are established after the round trip.
        let (ct, header) = bob.encrypt(b"b->a 0").unwrap();
        assert_eq!(alice.decrypt(&ct, &header).unwrap(), b"b->a 0");
        assert!(alice.is_established());
        assert!(bob.is_established());
        assert_eq!(header.pn, 0);

        // Alice again: her receive rotation zeroed the send chain, so
        // this is a fresh generation under a new ratchet key.
        let old_ratchet = bob.remote_ratchet;
        let (ct, header) = alice.encrypt(b"a->b 3").unwrap();
        assert_eq!(header.n, 0);
        assert_ne!(header.dh_public, old_ratchet);
        assert_eq!(bob.decrypt(&ct, &header).unwrap(), b"a->b 3");
    }

    #[test]
    fn out_of_order_within_a_chain() {
        let (mut alice, mut bob) = session_pair();

        let (ct1, h1) = alice.encrypt(b"m1").unwrap();
        let (ct2, h2) = alice.encrypt(b"m2").unwrap();
        let (ct3, h3) = alice.encrypt(b"m3").unwrap();

        // Deliver 3, 1, 2: m3 caches skipped keys for 0 and 1, then the
        // stragglers decrypt from the cache.
        assert_eq!(bob.decrypt(&ct3, &h3).unwrap(), b"m3");
        assert_eq!(bob.skipped.len(), 2);
        assert_eq!(bob.decrypt(&ct1, &h1).unwrap(), b"m1");
        assert_eq!(bob.decrypt(&ct2, &h2).unwrap(), b"m2");
        assert!(bob.skipped.is_empty());
    }

    #[test]
    fn replay_is_rejected() {
        let (mut alice, mut bob) = session_pair();

        let (ct, header) = alice.encrypt(b"once").unwrap();
        assert_eq!(bob.decrypt(&ct, &header).unwrap(), b"once");

        let err = bob.decrypt(&ct, &header).unwrap_err();
        assert!(matches!(err, CryptoError::DuplicateMessage(0)));
    }

    #[test]
    fn skipped_cache_evicts_oldest_on_overflow() {
        let (mut alice, mut bob) = session_pair();

        // Frame 0 is held back while 65 later frames are delivered; the
        // 65th skipped key pushes frame 0's key out of the cache.
        let (ct0, h0) = alice.encrypt(b"frame 0").unwrap();
        let mut frames = Vec::new();
        for i in 1..=(MAX_SKIPPED as u32 + 1) {
            frames.push(alice.encrypt(format!("frame {i}").as_bytes()).unwrap());
        }
        let (last_ct, last_header) = frames.pop().unwrap();
        assert_eq!(bob.decrypt(&last_ct, &last_header).unwrap(), b"frame 65");
        assert_eq!(bob.skipped.len(), MAX_SKIPPED);

        // The evicted frame can no longer be decrypted: its key is gone
        // and its counter sits below the receive chain.
        let err = bob.decrypt(&ct0, &h0).unwrap_err();
        assert!(matches!(err, CryptoError::DuplicateMessage(0)));

        // Frame 1 is still cached and decrypts fine.
        let (ct1, h1) = frames.remove(0);
        assert_eq!(bob.decrypt(&ct1, &h1).unwrap(), b"frame 1");
    }

    #[test]
    fn failed_decrypt_does_not_mutate_state() {
        let (mut alice, mut bob) = session_pair();

        let (ct, header) = alice.encrypt(b"good").unwrap();
        let mut tampered = ct.clone();
        tampered[0] ^= 0xFF;

        let before_index = bob.recv_chain.index;
        let before_root = bob.root_key;
        let err = bob.decrypt(&tampered, &header).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
        assert_eq!(bob.recv_chain.index, before_index);
        assert_eq!(bob.root_key, before_root);
        assert!(bob.skipped.is_empty());

        // The untampered frame still decrypts after the failure.
        assert_eq!(bob.decrypt(&ct, &header).unwrap(), b"good");
    }

    #[test]
    fn tampered_skipped_frame_leaves_cache_entry_usable() {
        let (mut alice, mut bob) = session_pair();

        let (ct1, h1) = alice.encrypt(b"m1").unwrap();
        let (ct2, h2) = alice.encrypt(b"m2").unwrap();
        assert_eq!(bob.decrypt(&ct2, &h2).unwrap(), b"m2");
        assert_eq!(bob.skipped.len(), 1);

        let mut tampered = ct1.clone();
        tampered[0] ^= 0x01;
        let err = bob.decrypt(&tampered, &h1).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
        assert_eq!(bob.skipped.len(), 1, "entry must survive the failed open");

        assert_eq!(bob.decrypt(&ct1, &h1).unwrap(), b"m1");
        assert!(bob.skipped.is_empty());
    }

    #[test]
    fn send_before_first_receive_works_for_responder() {
        let (mut alice, mut bob) = session_pair();

        // Bob speaks first: his send chain is zeroed, so this exercises
        // the lazy send rotation against Alice's ephemeral key.
        let (ct, header) = bob.encrypt(b"responder first").unwrap();
        assert_eq!(alice.decrypt(&ct, &header).unwrap(), b"responder first");
    }

    #[test]
    fn rotate_on_send_requires_remote_key() {
        let (mut alice, _bob) = session_pair();
        alice.remote_ratchet = [0u8; 32];
        alice.send_chain = ChainState::zero();
        let err = alice.encrypt(b"x").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidRemoteKey));
    }

    #[test]
    fn associated_data_layout() {
        let header = MessageHeader {
            dh_public: [0xAB; 32],
            pn: 0x01020304,
            n: 0x0A0B0C0D,
            nonce: [0; 12],
        };
        let ad = header.associated_data();
        assert_eq!(&ad[..32], &[0xAB; 32]);
        assert_eq!(&ad[32..36], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&ad[36..40], &[0x0A, 0x0B, 0x0C, 0x0D]);
    }
}
