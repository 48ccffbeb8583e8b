//! X3DH asynchronous key agreement.
//!
//! References:
//!   - Signal X3DH spec: <https://signal.org/docs/specifications/x3dh/>
//!   - RFC 7748 (X25519): <https://datatracker.ietf.org/doc/html/rfc7748>
//!   - RFC 5869 (HKDF):  <https://datatracker.ietf.org/doc/html/rfc5869>
//!
//! Protocol:
//!   Alice (initiator) fetches Bob's published bundle: IK_B (X25519
//!   identity DH public), SPK_B + Ed25519 signature, optionally OPK_B.
//!   She generates ONE ephemeral keypair EK_A and computes
//!
//! ```text
//!     DH1 = DH(IK_A, SPK_B)
//!     DH2 = DH(EK_A, IK_B)
//!     DH3 = DH(EK_A, SPK_B)
//!     DH4 = DH(EK_A, OPK_B)        [only if the bundle carries an OTK]
//!
//!   secret = DH1 ∥ DH2 ∥ DH3 [∥ DH4]
//!   (root_key, chain_key) = HKDF-SHA256(secret, info = "SecuMSG-X3DH")
//! ```
//!
//! Non-negotiable:
//!   - The initiator MUST verify the SPK signature before any DH.
//!   - Bob reconstructs the same DH set in the same order (the responder
//!     order below is canonical) and derives the same keys.
//!   - The initiator's first chain is the send chain; the responder's is
//!     the receive chain.

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::b64;
use crate::device::{verify_signature, Device};
use crate::error::CryptoError;
use crate::kdf;
use crate::random;
use crate::ratchet::{ChainState, Role, SessionState};

// ── Wire types ───────────────────────────────────────────────────────────────

/// Public half of a one-time prekey as it appears in a published bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePrekeyPublic {
    pub id: String,
    #[serde(with = "b64::array")]
    pub public: [u8; 32],
}

/// The public view a device publishes to the key directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeyBundle {
    /// X25519 identity DH public key.
    #[serde(with = "b64::array")]
    pub identity_key: [u8; 32],
    /// Ed25519 verifying key for the signed prekey signature.
    #[serde(with = "b64::vec")]
    pub identity_signature_key: Vec<u8>,
    #[serde(with = "b64::array")]
    pub signed_prekey: [u8; 32],
    #[serde(with = "b64::vec")]
    pub signed_prekey_sig: Vec<u8>,
    /// Publication form carries a batch; a directory FETCH returns at
    /// most one entry. The initiator consumes the first.
    #[serde(default)]
    pub one_time_prekeys: Vec<OneTimePrekeyPublic>,
}

/// Attached to the first ciphertext so the responder can derive the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeMessage {
    #[serde(with = "b64::array")]
    pub identity_key: [u8; 32],
    #[serde(with = "b64::vec")]
    pub identity_signature_key: Vec<u8>,
    #[serde(with = "b64::array")]
    pub ephemeral_key: [u8; 32],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_time_prekey_id: Option<String>,
}

// ── Initiator ────────────────────────────────────────────────────────────────

/// Initiate a session against a fetched prekey bundle.
///
/// Verifies the bundle, derives the X3DH secret and returns the fresh
/// session plus the handshake header to attach to the first message.
pub fn init_session(
    device: &Device,
    bundle: &PrekeyBundle,
) -> Result<(SessionState, HandshakeMessage), CryptoError> {
    if bundle.identity_signature_key.len() != 32 {
        return Err(CryptoError::InvalidPrekeySignature);
    }
    verify_signature(
        &bundle.identity_signature_key,
        &bundle.signed_prekey,
        &bundle.signed_prekey_sig,
    )
    .map_err(|_| CryptoError::InvalidPrekeySignature)?;

    let ephemeral = StaticSecret::from(random::bytes32());
    let ephemeral_public = X25519Public::from(&ephemeral).to_bytes();

    let spk = X25519Public::from(bundle.signed_prekey);
    let peer_identity = X25519Public::from(bundle.identity_key);

    let dh1 = StaticSecret::from(device.dh_private).diffie_hellman(&spk);
    let dh2 = ephemeral.diffie_hellman(&peer_identity);
    let dh3 = ephemeral.diffie_hellman(&spk);

    let mut secret = Vec::with_capacity(128);
    secret.extend_from_slice(dh1.as_bytes());
    secret.extend_from_slice(dh2.as_bytes());
    secret.extend_from_slice(dh3.as_bytes());

    let otk = bundle.one_time_prekeys.first();
    if let Some(otk) = otk {
        let dh4 = ephemeral.diffie_hellman(&X25519Public::from(otk.public));
        secret.extend_from_slice(dh4.as_bytes());
    }

    let (root_key, chain_key) = kdf::handshake_keys(&secret)?;
    secret.zeroize();

    let session = SessionState {
        root_key,
        send_chain: ChainState { key: chain_key, index: 0 },
        recv_chain: ChainState::zero(),
        ratchet_private: ephemeral.to_bytes(),
        ratchet_public: ephemeral_public,
        remote_ratchet: bundle.signed_prekey,
        remote_identity: bundle.identity_key,
        remote_signature: bundle.identity_signature_key.clone(),
        pn: 0,
        role: Role::Initiator,
        pending_prekey: otk.map(|o| o.id.clone()),
        skipped: Default::default(),
    };

    let handshake = HandshakeMessage {
        identity_key: device.dh_public,
        identity_signature_key: device.signing_public.to_vec(),
        ephemeral_key: ephemeral_public,
        one_time_prekey_id: otk.map(|o| o.id.clone()),
    };

    Ok((session, handshake))
}

// ── Responder ────────────────────────────────────────────────────────────────

/// Accept a handshake message and reconstruct the shared secret.
///
/// If the message references a one-time prekey, that key is removed from
/// the device pool; a second handshake naming the same id fails with
/// `MissingOneTimeKey`.
pub fn accept_session(
    device: &mut Device,
    msg: &HandshakeMessage,
) -> Result<SessionState, CryptoError> {
    let otk = match &msg.one_time_prekey_id {
        Some(id) => Some(
            device
                .take_one_time_prekey(id)
                .ok_or_else(|| CryptoError::MissingOneTimeKey(id.clone()))?,
        ),
        None => None,
    };

    let ephemeral = X25519Public::from(msg.ephemeral_key);
    let peer_identity = X25519Public::from(msg.identity_key);
    let spk_secret = StaticSecret::from(device.signed_prekey.private);

    // Mirror the initiator's DH order exactly:
    //   DH1 = IK_A × SPK_B, DH2 = EK_A × IK_B, DH3 = EK_A × SPK_B
    let dh1 = spk_secret.diffie_hellman(&peer_identity);
    let dh2 = StaticSecret::from(device.dh_private).diffie_hellman(&ephemeral);
    let dh3 = spk_secret.diffie_hellman(&ephemeral);

    let mut secret = Vec::with_capacity(128);
    secret.extend_from_slice(dh1.as_bytes());
    secret.extend_from_slice(dh2.as_bytes());
    secret.extend_from_slice(dh3.as_bytes());

    if let Some(otk) = &otk {
        let dh4 = StaticSecret::from(otk.private).diffie_hellman(&ephemeral);
        secret.extend_from_slice(dh4.as_bytes());
    }

    let (root_key, chain_key) = kdf::handshake_keys(&secret)?;
    secret.zeroize();

    Ok(SessionState {
        root_key,
        send_chain: ChainState::zero(),
        recv_chain: ChainState { key: chain_key, index: 0 },
        ratchet_private: device.signed_prekey.private,
        ratchet_public: device.signed_prekey.public,
        remote_ratchet: msg.ephemeral_key,
        remote_identity: msg.identity_key,
        remote_signature: msg.identity_signature_key.clone(),
        pn: 0,
        role: Role::Responder,
        pending_prekey: msg.one_time_prekey_id.clone(),
        skipped: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::test_support::{PatternReader, EXCLUSIVE};
    use crate::random::use_deterministic_random;

    #[test]
    fn handshake_converges_without_otk() {
        let alice = Device::generate();
        let mut bob = Device::generate();
        let bundle = bob.publish_prekey_bundle(0);

        let (alice_session, handshake) = init_session(&alice, &bundle).unwrap();
        assert!(handshake.one_time_prekey_id.is_none());

        let bob_session = accept_session(&mut bob, &handshake).unwrap();
        assert_eq!(alice_session.root_key, bob_session.root_key);
        assert_eq!(alice_session.send_chain.key, bob_session.recv_chain.key);
        assert_eq!(alice_session.role, Role::Initiator);
        assert_eq!(bob_session.role, Role::Responder);
    }

    #[test]
    fn handshake_converges_with_otk_and_consumes_it() {
        let alice = Device::generate();
        let mut bob = Device::generate();
        let bundle = bob.publish_prekey_bundle(2);
        assert_eq!(bob.one_time_pool_len(), 2);

        let (alice_session, handshake) = init_session(&alice, &bundle).unwrap();
        let used = handshake.one_time_prekey_id.clone().unwrap();

        let bob_session = accept_session(&mut bob, &handshake).unwrap();
        assert_eq!(alice_session.root_key, bob_session.root_key);
        assert_eq!(bob.one_time_pool_len(), 1);

        // Replayed handshake referencing the consumed OTK must fail.
        let err = accept_session(&mut bob, &handshake).unwrap_err();
        match err {
            CryptoError::MissingOneTimeKey(id) => assert_eq!(id, used),
            other => panic!("expected MissingOneTimeKey, got {other}"),
        }
    }

    #[test]
    fn rejects_bundle_signed_by_wrong_identity() {
        let alice = Device::generate();
        let mut bob = Device::generate();
        let evil = Device::generate();

        let mut bundle = bob.publish_prekey_bundle(1);
        bundle.signed_prekey_sig = evil.sign(&bundle.signed_prekey);

        let err = init_session(&alice, &bundle).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPrekeySignature));
    }

    #[test]
    fn rejects_wrong_length_signature_key() {
        let alice = Device::generate();
        let mut bob = Device::generate();
        let mut bundle = bob.publish_prekey_bundle(0);
        bundle.identity_signature_key.truncate(16);

        let err = init_session(&alice, &bundle).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPrekeySignature));
    }

    /// Fixed vector: deterministic byte stream `i mod 251`, devices
    /// created in order (Alice, Bob), Bob publishes two one-time
    /// prekeys, Alice initiates and encrypts "hello bob".
    #[test]
    fn deterministic_first_message_vector() {
        let _exclusive = EXCLUSIVE.lock().unwrap_or_else(|e| e.into_inner());
        let _restore = use_deterministic_random(Box::new(PatternReader::new()));

        let alice = Device::generate();
        let mut bob = Device::generate();
        let bundle = bob.publish_prekey_bundle(2);

        let (mut alice_session, handshake) = init_session(&alice, &bundle).unwrap();
        assert_eq!(
            hex::encode(handshake.ephemeral_key),
            "dc2cca31e8e43bbd91dff7e475cca3347eb478107d5bd765aba4ae4a30c35d44"
        );
        assert_eq!(
            hex::encode(alice_session.root_key),
            "599a9d4b42e82e9f389c697aea3847e8b9385bd27bbe72b9ef28ca17838f2142"
        );
        assert_eq!(
            hex::encode(alice_session.send_chain.key),
            "b9db519a2fa4409f769a615c6a8342a63f315cd389ae4e0416044f811fee967c"
        );

        let (ciphertext, header) = alice_session.encrypt(b"hello bob").unwrap();
        assert_eq!(
            hex::encode(&ciphertext),
            "a8105aa6824cac0cbd41ded989db0d528ae5011a00bb0e238b"
        );
        assert_eq!(header.n, 0);
        assert_eq!(header.pn, 0);

        // The responder decrypts the exact frame.
        let mut bob_session = accept_session(&mut bob, &handshake).unwrap();
        let plaintext = bob_session.decrypt(&ciphertext, &header).unwrap();
        assert_eq!(plaintext, b"hello bob");

        // Replay of the same frame is rejected without producing plaintext.
        let err = bob_session.decrypt(&ciphertext, &header).unwrap_err();
        assert!(matches!(err, CryptoError::DuplicateMessage(0)));
    }
}
