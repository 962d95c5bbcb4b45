//! The top-level group-key owner. Holds one `Session` per peer, advances
//! the local secret key material on membership changes, and routes
//! inbound wire frames to the right session.

use std::collections::HashMap;

use ed25519_dalek::VerifyingKey;
use tracing::{debug, trace, warn};

use crate::error::CoreError;
use crate::keys::{EphemeralKeyPair, IdentityKeyPair, PreKeyBundle, PreKeyPair};
use crate::primitives::{fill_random, fingerprint, hkdf_sha256};
use crate::ratchet::DEFAULT_MAX_SKIP;
use crate::session::{Role, Session};
use crate::wire::{CipherMessage, ConnectionId, PreKeyMessage};

const SFRAME_RATCHET_INFO: &[u8] = b"SFrameRatchetKey";

/// The one protocol-level tunable: how many messages a receiving chain may
/// skip past before a gap is treated as a fatal protocol error rather than
/// ordinary reordering.
#[derive(Clone, Copy, Debug)]
pub struct ParticipantConfig {
    pub max_skip: u32,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self { max_skip: DEFAULT_MAX_SKIP }
    }
}

/// One outbound wire frame produced by a `Participant` operation. The
/// caller is responsible for transport; the core never sends anything
/// itself.
#[derive(Clone, Debug)]
pub enum OutboundMessage {
    PreKey(PreKeyMessage),
    Cipher(CipherMessage),
}

/// Result of `Participant::start_session`.
#[derive(Debug)]
pub struct StartSessionResult {
    pub self_connection_id: ConnectionId,
    pub self_key_id: u32,
    pub self_secret_key_material: [u8; 32],
    /// The advanced view of every other existing peer's key material,
    /// recorded locally so the caller can notify them without an extra
    /// round trip through `receive_message`.
    pub remote_secret_key_materials: HashMap<ConnectionId, (u32, [u8; 32])>,
    pub messages: Vec<OutboundMessage>,
}

/// Result of `Participant::stop_session`.
#[derive(Debug)]
pub struct StopSessionResult {
    pub self_connection_id: ConnectionId,
    pub self_key_id: u32,
    pub self_secret_key_material: [u8; 32],
    pub messages: Vec<OutboundMessage>,
}

/// Result of `Participant::receive_message`.
#[derive(Debug, Default)]
pub struct ReceiveResult {
    pub remote_secret_key_materials: HashMap<ConnectionId, (u32, [u8; 32])>,
    pub messages: Vec<OutboundMessage>,
}

/// `HKDF-SHA256(salt = 32 zero bytes, ikm = sk, info = "SFrameRatchetKey", L
/// = 32)`: the one-step advancement applied to secret key material when
/// group membership grows.
fn sframe_ratchet(sk: &[u8; 32]) -> Result<[u8; 32], CoreError> {
    let mut out = [0u8; 32];
    hkdf_sha256(&[0u8; 32], sk, SFRAME_RATCHET_INFO, &mut out)?;
    Ok(out)
}

pub struct Participant {
    key_id: u32,
    secret_key_material: [u8; 32],
    connection_id: Option<ConnectionId>,
    identity_key_pair: IdentityKeyPair,
    pre_key_pair: PreKeyPair,
    self_pre_key_bundle: PreKeyBundle,
    remote_pre_key_bundles: HashMap<ConnectionId, PreKeyBundle>,
    sessions: HashMap<ConnectionId, Session>,
    config: ParticipantConfig,
}

impl Participant {
    /// `init`: generate a fresh identity, signed pre-key, and random secret
    /// key material. Does not require a connection id yet — see `start`.
    pub fn init(config: ParticipantConfig) -> Self {
        let identity_key_pair = IdentityKeyPair::generate();
        let pre_key_pair = PreKeyPair::generate();
        let self_pre_key_bundle = PreKeyBundle::generate(&identity_key_pair, &pre_key_pair);

        let mut secret_key_material = [0u8; 32];
        fill_random(&mut secret_key_material);

        debug!(fingerprint = %fingerprint(&identity_key_pair.public_key_bytes()), "participant initialized");

        Self {
            key_id: 0,
            secret_key_material,
            connection_id: None,
            identity_key_pair,
            pre_key_pair,
            self_pre_key_bundle,
            remote_pre_key_bundles: HashMap::new(),
            sessions: HashMap::new(),
            config,
        }
    }

    pub fn pre_key_bundle(&self) -> &PreKeyBundle {
        &self.self_pre_key_bundle
    }

    /// `start`: bind this participant to a connection id and return the
    /// current `(key_id, secret_key_material)`.
    pub fn start(&mut self, self_connection_id: ConnectionId) -> (u32, [u8; 32]) {
        self.connection_id = Some(self_connection_id);
        debug!(self_connection_id = hex::encode(self_connection_id), "participant started");
        (self.key_id, self.secret_key_material)
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn secret_key_material(&self) -> [u8; 32] {
        self.secret_key_material
    }

    pub fn self_fingerprint(&self) -> String {
        fingerprint(&self.identity_key_pair.public_key_bytes())
    }

    pub fn remote_fingerprints(&self) -> HashMap<ConnectionId, String> {
        self.sessions
            .iter()
            .map(|(peer, session)| (*peer, fingerprint(&session.remote_identity_public())))
            .collect()
    }

    fn self_connection_id(&self) -> Result<ConnectionId, CoreError> {
        self.connection_id
            .ok_or_else(|| CoreError::Crypto("participant has not been started".into()))
    }

    /// Verify and install a peer's `PreKeyBundle`. Rejects a second bundle
    /// for a peer that already has one installed.
    pub fn add_pre_key_bundle(&mut self, peer_connection_id: ConnectionId, bundle: PreKeyBundle) -> Result<(), CoreError> {
        self.install_bundle(peer_connection_id, bundle)
    }

    fn install_bundle(&mut self, peer_connection_id: ConnectionId, bundle: PreKeyBundle) -> Result<(), CoreError> {
        bundle.verify()?;
        if self.remote_pre_key_bundles.contains_key(&peer_connection_id) {
            return Err(CoreError::AlreadyExistRemotePreKeyBundle(hex::encode(peer_connection_id)));
        }
        self.remote_pre_key_bundles.insert(peer_connection_id, bundle);
        Ok(())
    }

    /// Start a new pairwise session as the sender/initiator: runs X3DH and
    /// the ratchet's sender-init, advances the local secret key material
    /// (and every other existing session's recorded view of it) via
    /// `SFrameRatchet`, and emits a `PreKeyMessage` plus the first
    /// `CipherMessage` carrying the post-advancement key material.
    pub fn start_session(&mut self, peer_connection_id: ConnectionId, bundle: PreKeyBundle) -> Result<StartSessionResult, CoreError> {
        if self.sessions.contains_key(&peer_connection_id) {
            return Err(CoreError::SessionAlreadyExists(hex::encode(peer_connection_id)));
        }
        let self_connection_id = self.self_connection_id()?;
        self.install_bundle(peer_connection_id, bundle.clone())?;

        let ephemeral = EphemeralKeyPair::generate();
        let mut session = Session::new_sender(
            self_connection_id,
            peer_connection_id,
            &self.identity_key_pair,
            &ephemeral,
            &bundle,
            self.config.max_skip,
        )?;

        let mut remote_secret_key_materials = HashMap::new();
        for (existing_peer, existing_session) in &mut self.sessions {
            if let Some(remote_sk) = existing_session.remote_secret_key_material() {
                let advanced = sframe_ratchet(&remote_sk)?;
                let advanced_key_id = existing_session.remote_key_id().unwrap_or(0) + 1;
                existing_session.record_advanced_remote_material(advanced_key_id, advanced);
                trace!(peer = hex::encode(existing_peer), "advanced recorded remote key material on join");
                remote_secret_key_materials.insert(*existing_peer, (advanced_key_id, advanced));
            }
        }

        self.secret_key_material = sframe_ratchet(&self.secret_key_material)?;
        self.key_id += 1;

        let pre_key_message = PreKeyMessage {
            src_connection_id: self_connection_id,
            dst_connection_id: peer_connection_id,
            identity_key: self.identity_key_pair.public_key_bytes(),
            ephemeral_key: *ephemeral.public.as_bytes(),
        };
        let cipher_message = session.encrypt_key_material(self.key_id, &self.secret_key_material)?;

        self.sessions.insert(peer_connection_id, session);

        debug!(
            peer = hex::encode(peer_connection_id),
            key_id = self.key_id,
            "started session with new peer"
        );

        Ok(StartSessionResult {
            self_connection_id,
            self_key_id: self.key_id,
            self_secret_key_material: self.secret_key_material,
            remote_secret_key_materials,
            messages: vec![OutboundMessage::PreKey(pre_key_message), OutboundMessage::Cipher(cipher_message)],
        })
    }

    /// Stop a pairwise session: the peer leaves, the local secret key
    /// material is replaced with fresh randomness (not ratcheted, for a
    /// clean forward-secrecy break), and every remaining peer receives a
    /// `CipherMessage` carrying the new material.
    pub fn stop_session(&mut self, peer_connection_id: ConnectionId) -> Result<StopSessionResult, CoreError> {
        if self.sessions.remove(&peer_connection_id).is_none() {
            return Err(CoreError::MissingSession(hex::encode(peer_connection_id)));
        }
        self.remote_pre_key_bundles.remove(&peer_connection_id);

        let mut secret_key_material = [0u8; 32];
        fill_random(&mut secret_key_material);
        self.secret_key_material = secret_key_material;
        self.key_id += 1;

        let mut messages = Vec::with_capacity(self.sessions.len());
        for session in self.sessions.values_mut() {
            messages.push(OutboundMessage::Cipher(session.encrypt_key_material(self.key_id, &self.secret_key_material)?));
        }

        debug!(peer = hex::encode(peer_connection_id), key_id = self.key_id, "stopped session");

        Ok(StopSessionResult {
            self_connection_id: self.self_connection_id()?,
            self_key_id: self.key_id,
            self_secret_key_material: self.secret_key_material,
            messages,
        })
    }

    /// Dispatch an inbound wire frame. `PreKeyMessage`s open a receiver
    /// session (or are silently discarded if one already exists);
    /// `CipherMessage`s decrypt through the matching session's ratchet.
    pub fn receive_message(&mut self, bytes: &[u8]) -> Result<ReceiveResult, CoreError> {
        match crate::wire::peek_type(bytes)? {
            0 => self.receive_pre_key_message(bytes),
            1 => self.receive_cipher_message(bytes),
            other => Err(CoreError::UnknownMessage(other)),
        }
    }

    fn receive_pre_key_message(&mut self, bytes: &[u8]) -> Result<ReceiveResult, CoreError> {
        let message = PreKeyMessage::decode(bytes)?;
        let peer = message.src_connection_id;

        let bundle = self
            .remote_pre_key_bundles
            .get(&peer)
            .ok_or_else(|| CoreError::MissingPreKeyBundle(hex::encode(peer)))?;
        if bundle.identity_key != message.identity_key {
            return Err(CoreError::UnmatchIdentityKey(hex::encode(peer)));
        }

        if self.sessions.contains_key(&peer) {
            warn!(peer = hex::encode(peer), "discarding duplicate PreKeyMessage for existing session");
            return Ok(ReceiveResult::default());
        }

        let self_connection_id = self.self_connection_id()?;
        let remote_identity = VerifyingKey::from_bytes(&message.identity_key).map_err(|e| CoreError::KeyConvert(e.to_string()))?;
        let remote_ephemeral = x25519_dalek::PublicKey::from(message.ephemeral_key);

        let session = Session::new_receiver(
            self_connection_id,
            peer,
            &self.identity_key_pair,
            &self.pre_key_pair,
            remote_identity,
            remote_ephemeral,
            self.config.max_skip,
        )?;
        self.sessions.insert(peer, session);

        debug!(peer = hex::encode(peer), "opened receiver session from PreKeyMessage");
        Ok(ReceiveResult::default())
    }

    fn receive_cipher_message(&mut self, bytes: &[u8]) -> Result<ReceiveResult, CoreError> {
        let message = CipherMessage::decode(bytes)?;
        let peer = message.src_connection_id;

        let session = self
            .sessions
            .get_mut(&peer)
            .ok_or_else(|| CoreError::MissingSession(hex::encode(peer)))?;

        let is_first_material_from_peer = session.remote_secret_key_material().is_none();
        let (key_id, secret_key_material) = session.decrypt_key_material(&message)?;

        let mut messages = Vec::new();
        if session.role() == Role::Receiver && is_first_material_from_peer {
            let reply = session.encrypt_key_material(self.key_id, &self.secret_key_material)?;
            messages.push(OutboundMessage::Cipher(reply));
        }

        trace!(peer = hex::encode(peer), key_id, "decrypted key material from peer");

        let mut remote_secret_key_materials = HashMap::new();
        remote_secret_key_materials.insert(peer, (key_id, secret_key_material));

        Ok(ReceiveResult { remote_secret_key_materials, messages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_start_yields_key_id_zero() {
        let mut alice = Participant::init(ParticipantConfig::default());
        let (key_id, _) = alice.start([b'A'; 26]);
        assert_eq!(key_id, 0);
    }

    #[test]
    fn two_party_handshake() {
        let mut alice = Participant::init(ParticipantConfig::default());
        let mut bob = Participant::init(ParticipantConfig::default());
        alice.start([b'A'; 26]);
        bob.start([b'B'; 26]);

        let start_result = alice.start_session([b'B'; 26], bob.pre_key_bundle().clone()).unwrap();
        assert_eq!(alice.key_id(), 1);
        assert_eq!(start_result.messages.len(), 2);

        bob.add_pre_key_bundle([b'A'; 26], alice.pre_key_bundle().clone()).unwrap();

        let OutboundMessage::PreKey(pre_key) = &start_result.messages[0] else {
            panic!("expected PreKeyMessage first");
        };
        let OutboundMessage::Cipher(cipher) = &start_result.messages[1] else {
            panic!("expected CipherMessage second");
        };

        let receive_prekey = bob.receive_message(&pre_key.encode()).unwrap();
        assert!(receive_prekey.messages.is_empty());
        assert!(receive_prekey.remote_secret_key_materials.is_empty());
        assert_eq!(bob.key_id(), 0);

        let receive_cipher = bob.receive_message(&cipher.encode().unwrap()).unwrap();
        assert_eq!(receive_cipher.messages.len(), 1);
        let (peer_key_id, peer_sk) = receive_cipher.remote_secret_key_materials[&[b'A'; 26]];
        assert_eq!(peer_key_id, 1);
        assert_eq!(peer_sk, start_result.self_secret_key_material);

        let OutboundMessage::Cipher(bob_reply) = &receive_cipher.messages[0] else {
            panic!("expected CipherMessage reply");
        };
        let alice_receive = alice.receive_message(&bob_reply.encode().unwrap()).unwrap();
        let (bob_key_id, _) = alice_receive.remote_secret_key_materials[&[b'B'; 26]];
        assert_eq!(bob_key_id, 0);
    }

    #[test]
    fn duplicate_pre_key_message_is_discarded_not_fatal() {
        let mut alice = Participant::init(ParticipantConfig::default());
        let mut bob = Participant::init(ParticipantConfig::default());
        alice.start([b'A'; 26]);
        bob.start([b'B'; 26]);

        let start_result = alice.start_session([b'B'; 26], bob.pre_key_bundle().clone()).unwrap();
        bob.add_pre_key_bundle([b'A'; 26], alice.pre_key_bundle().clone()).unwrap();

        let OutboundMessage::PreKey(pre_key) = &start_result.messages[0] else {
            panic!("expected PreKeyMessage");
        };
        bob.receive_message(&pre_key.encode()).unwrap();
        let second = bob.receive_message(&pre_key.encode()).unwrap();
        assert!(second.messages.is_empty());
        assert!(second.remote_secret_key_materials.is_empty());
    }

    #[test]
    fn stop_session_generates_fresh_independent_material() {
        let mut alice = Participant::init(ParticipantConfig::default());
        let mut bob = Participant::init(ParticipantConfig::default());
        alice.start([b'A'; 26]);
        bob.start([b'B'; 26]);
        alice.start_session([b'B'; 26], bob.pre_key_bundle().clone()).unwrap();

        let before = alice.secret_key_material();
        let stop_result = alice.stop_session([b'B'; 26]).unwrap();
        assert_eq!(alice.key_id(), 2);
        assert_ne!(stop_result.self_secret_key_material, before);
        assert!(alice.stop_session([b'B'; 26]).is_err());
    }

    #[test]
    fn cipher_message_for_unknown_peer_is_missing_session() {
        let mut alice = Participant::init(ParticipantConfig::default());
        alice.start([b'A'; 26]);
        let bogus = CipherMessage {
            src_connection_id: [b'Z'; 26],
            dst_connection_id: [b'A'; 26],
            header: crate::ratchet::RatchetHeader { dh: [0u8; 32], pn: 0, n: 0 },
            ciphertext: vec![0u8; 16],
        };
        let err = alice.receive_message(&bogus.encode().unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::MissingSession(_)));
    }
}
