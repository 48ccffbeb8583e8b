//! Protocol-level tests across the handshake and ratchet as a client
//! would drive them: long conversations, direction changes, and
//! out-of-order delivery under permutations.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use sm_crypto::device::Device;
use sm_crypto::ratchet::{MessageHeader, SessionState, MAX_SKIPPED};
use sm_crypto::x3dh::{accept_session, init_session};

fn session_pair(one_time_count: i32) -> (SessionState, SessionState) {
    let alice = Device::generate();
    let mut bob = Device::generate();
    let bundle = bob.publish_prekey_bundle(one_time_count);
    let (alice_session, handshake) = init_session(&alice, &bundle).unwrap();
    let bob_session = accept_session(&mut bob, &handshake).unwrap();
    (alice_session, bob_session)
}

#[test]
fn long_conversation_with_direction_changes() {
    let (mut alice, mut bob) = session_pair(1);

    // 50 rounds, a couple of messages per turn, alternating direction
    // so the DH ratchet rotates every round.
    for round in 0..50u32 {
        for i in 0..3u32 {
            let msg = format!("alice r{round} m{i}");
            let (ct, header) = alice.encrypt(msg.as_bytes()).unwrap();
            assert_eq!(bob.decrypt(&ct, &header).unwrap(), msg.as_bytes());
        }
        for i in 0..2u32 {
            let msg = format!("bob r{round} m{i}");
            let (ct, header) = bob.encrypt(msg.as_bytes()).unwrap();
            assert_eq!(alice.decrypt(&ct, &header).unwrap(), msg.as_bytes());
        }
    }
    assert!(alice.is_established());
    assert!(bob.is_established());
}

#[test]
fn zero_one_time_prekey_bundle_still_converges() {
    let (mut alice, mut bob) = session_pair(0);

    let (ct, header) = alice.encrypt(b"no otk involved").unwrap();
    assert_eq!(bob.decrypt(&ct, &header).unwrap(), b"no otk involved");
    assert!(alice.pending_prekey().is_none());
    assert!(bob.pending_prekey().is_none());
}

#[test]
fn any_permutation_within_the_cache_bound_decrypts() {
    // Seeded shuffles keep the test reproducible across runs.
    let mut rng = StdRng::seed_from_u64(4);

    for _ in 0..4 {
        let (mut alice, mut bob) = session_pair(1);

        let mut frames: Vec<(Vec<u8>, MessageHeader, String)> = (0..MAX_SKIPPED as u32)
            .map(|i| {
                let msg = format!("frame {i}");
                let (ct, header) = alice.encrypt(msg.as_bytes()).unwrap();
                (ct, header, msg)
            })
            .collect();
        frames.shuffle(&mut rng);

        for (ct, header, msg) in &frames {
            assert_eq!(bob.decrypt(ct, header).unwrap(), msg.as_bytes());
        }
    }
}

#[test]
fn out_of_order_across_a_rotation_boundary() {
    let (mut alice, mut bob) = session_pair(1);

    // Establish both directions first.
    let (ct, header) = alice.encrypt(b"a0").unwrap();
    bob.decrypt(&ct, &header).unwrap();
    let (ct, header) = bob.encrypt(b"b0").unwrap();
    alice.decrypt(&ct, &header).unwrap();

    // Alice starts a new generation; its frames arrive reversed.
    let (ct1, h1) = alice.encrypt(b"gen2 first").unwrap();
    let (ct2, h2) = alice.encrypt(b"gen2 second").unwrap();
    assert_eq!(bob.decrypt(&ct2, &h2).unwrap(), b"gen2 second");
    assert_eq!(bob.decrypt(&ct1, &h1).unwrap(), b"gen2 first");
}

#[test]
fn sessions_with_different_peers_are_independent() {
    let alice = Device::generate();
    let mut bob = Device::generate();
    let mut carol = Device::generate();

    let (mut to_bob, handshake_bob) = init_session(&alice, &bob.publish_prekey_bundle(1)).unwrap();
    let (mut to_carol, _handshake_carol) =
        init_session(&alice, &carol.publish_prekey_bundle(1)).unwrap();

    let (ct, header) = to_bob.encrypt(b"for bob").unwrap();
    let mut bob_session = accept_session(&mut bob, &handshake_bob).unwrap();
    assert_eq!(bob_session.decrypt(&ct, &header).unwrap(), b"for bob");

    // Carol's session shares nothing with Bob's.
    assert_ne!(to_bob.root_key(), to_carol.root_key());
    let (ct, header) = to_carol.encrypt(b"for carol").unwrap();
    assert!(bob_session.decrypt(&ct, &header).is_err());
}
