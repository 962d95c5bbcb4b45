//! End-to-end scenarios driven entirely through the public `Participant`
//! API — no internal state is touched directly. Mirrors three participants
//! joining and leaving a conference, with every wire frame passed through
//! real encode/decode round trips.

use std::collections::HashMap;

use roomcrypt::{OutboundMessage, Participant, ParticipantConfig};

fn conn_id(tag: &str) -> [u8; 26] {
    let mut out = [b'-'; 26];
    let bytes = tag.as_bytes();
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

fn deliver(participant: &mut Participant, message: &OutboundMessage) -> roomcrypt::ReceiveResult {
    let bytes = match message {
        OutboundMessage::PreKey(m) => m.encode(),
        OutboundMessage::Cipher(m) => m.encode().expect("ciphertext within u16 bound"),
    };
    participant.receive_message(&bytes).expect("delivered message must decode and apply cleanly")
}

/// Runs a full sender-initiated handshake between `a` and `b`, verifying
/// both sides converge on the same key material, and returns it.
fn handshake(a: &mut Participant, a_id: [u8; 26], b: &mut Participant, b_id: [u8; 26]) -> (u32, [u8; 32]) {
    let start = a.start_session(b_id, b.pre_key_bundle().clone()).unwrap();
    b.add_pre_key_bundle(a_id, a.pre_key_bundle().clone()).unwrap();

    assert_eq!(start.messages.len(), 2);
    let prekey_receipt = deliver(b, &start.messages[0]);
    assert!(prekey_receipt.messages.is_empty());

    let cipher_receipt = deliver(b, &start.messages[1]);
    assert_eq!(cipher_receipt.messages.len(), 1);
    let (learned_key_id, learned_sk) = cipher_receipt.remote_secret_key_materials[&a_id];
    assert_eq!(learned_key_id, start.self_key_id);
    assert_eq!(learned_sk, start.self_secret_key_material);

    let reply_receipt = deliver(a, &cipher_receipt.messages[0]);
    assert_eq!(reply_receipt.remote_secret_key_materials[&b_id], (b.key_id(), b.secret_key_material()));

    (learned_key_id, learned_sk)
}

#[test]
fn two_party_handshake_converges_on_matching_key_material() {
    let mut alice = Participant::init(ParticipantConfig::default());
    let mut bob = Participant::init(ParticipantConfig::default());
    let alice_id = conn_id("ALICE");
    let bob_id = conn_id("BOB");
    alice.start(alice_id);
    bob.start(bob_id);

    handshake(&mut alice, alice_id, &mut bob, bob_id);

    assert_eq!(alice.key_id(), 1);
    assert_eq!(bob.key_id(), 0);
}

#[test]
fn three_party_join_establishes_pairwise_agreement_with_the_new_peer() {
    let mut alice = Participant::init(ParticipantConfig::default());
    let mut bob = Participant::init(ParticipantConfig::default());
    let mut carol = Participant::init(ParticipantConfig::default());
    let alice_id = conn_id("ALICE");
    let bob_id = conn_id("BOB");
    let carol_id = conn_id("CAROL");
    alice.start(alice_id);
    bob.start(bob_id);
    carol.start(carol_id);

    handshake(&mut alice, alice_id, &mut bob, bob_id);
    assert_eq!(alice.key_id(), 1);

    handshake(&mut alice, alice_id, &mut carol, carol_id);
    assert_eq!(alice.key_id(), 2);

    handshake(&mut bob, bob_id, &mut carol, carol_id);
    assert_eq!(bob.key_id(), 1);

    // Every direct pair agrees on the peer's last-announced key material.
    let alice_to_bob: HashMap<_, _> = alice.remote_fingerprints().into_iter().collect();
    assert_eq!(alice_to_bob[&bob_id], bob.self_fingerprint());
    assert_eq!(alice.remote_fingerprints()[&carol_id], carol.self_fingerprint());
    assert_eq!(bob.remote_fingerprints()[&carol_id], carol.self_fingerprint());
}

#[test]
fn leave_rotates_to_fresh_independent_material_and_notifies_remaining_peers() {
    let mut alice = Participant::init(ParticipantConfig::default());
    let mut bob = Participant::init(ParticipantConfig::default());
    let mut carol = Participant::init(ParticipantConfig::default());
    let alice_id = conn_id("ALICE");
    let bob_id = conn_id("BOB");
    let carol_id = conn_id("CAROL");
    alice.start(alice_id);
    bob.start(bob_id);
    carol.start(carol_id);

    handshake(&mut alice, alice_id, &mut bob, bob_id);
    handshake(&mut alice, alice_id, &mut carol, carol_id);
    handshake(&mut bob, bob_id, &mut carol, carol_id);

    let alice_sk_before = alice.secret_key_material();
    let stop = alice.stop_session(carol_id).unwrap();
    assert_eq!(alice.key_id(), 3);
    assert_ne!(stop.self_secret_key_material, alice_sk_before);
    assert_eq!(stop.messages.len(), 1);

    let receipt = deliver(&mut bob, &stop.messages[0]);
    let (notified_key_id, notified_sk) = receipt.remote_secret_key_materials[&alice_id];
    assert_eq!(notified_key_id, stop.self_key_id);
    assert_eq!(notified_sk, stop.self_secret_key_material);

    // Alice no longer has a session with Carol; a repeat stop is an error.
    assert!(alice.stop_session(carol_id).is_err());

    let bob_stop = bob.stop_session(carol_id).unwrap();
    assert_eq!(bob.key_id(), 2);
    deliver(&mut alice, &bob_stop.messages[0]);
}
