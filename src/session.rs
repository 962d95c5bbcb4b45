//! A `Session` ties one peer's X3DH-derived root key to a `RatchetState`
//! and tracks the peer's most recently learned secret key material. A
//! `Participant` owns one `Session` per peer by value.

use ed25519_dalek::VerifyingKey;
use tracing::debug;

use crate::error::CoreError;
use crate::keys::{EphemeralKeyPair, IdentityKeyPair, PreKeyBundle, PreKeyPair};
use crate::ratchet::RatchetState;
use crate::wire::{CipherMessage, ConnectionId};
use crate::x3dh;

/// Inner plaintext of every `CipherMessage`: the sender's current key id
/// and secret key material, with no framing or version byte.
const KEY_MATERIAL_LEN: usize = 36;

/// The two roles a pairwise session can take. They differ in the ordering
/// of the AEAD associated data, in which key pair seeds the first ratchet
/// step, and in whether the first received `CipherMessage` triggers an
/// auto-reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

pub struct Session {
    role: Role,
    self_connection_id: ConnectionId,
    remote_connection_id: ConnectionId,
    remote_identity_public: [u8; 32],
    ad: Vec<u8>,
    remote_key_id: Option<u32>,
    remote_secret_key_material: Option<[u8; 32]>,
    sent_own_material: bool,
    ratchet: RatchetState,
}

impl Session {
    /// Sender path: we initiated via `start_session`. `ad` is
    /// `self_identity ∥ remote_identity`.
    pub fn new_sender(
        self_connection_id: ConnectionId,
        remote_connection_id: ConnectionId,
        self_identity: &IdentityKeyPair,
        self_ephemeral: &EphemeralKeyPair,
        remote_bundle: &PreKeyBundle,
        max_skip: u32,
    ) -> Result<Self, CoreError> {
        let root_key = x3dh::sender_root_key(self_identity, self_ephemeral, remote_bundle)?;
        let ratchet = RatchetState::sender_init(&root_key, remote_bundle, max_skip)?;

        let mut ad = Vec::with_capacity(64);
        ad.extend_from_slice(&self_identity.public_key_bytes());
        ad.extend_from_slice(&remote_bundle.identity_key);

        debug!(
            self_connection_id = hex::encode(self_connection_id),
            remote_connection_id = hex::encode(remote_connection_id),
            role = "sender",
            "session established"
        );

        Ok(Self {
            role: Role::Sender,
            self_connection_id,
            remote_connection_id,
            remote_identity_public: remote_bundle.identity_key,
            ad,
            remote_key_id: None,
            remote_secret_key_material: None,
            sent_own_material: false,
            ratchet,
        })
    }

    /// Receiver path: a `PreKeyMessage` arrived from `remote_connection_id`.
    /// `ad` is `remote_identity ∥ self_identity` — the mirror image of the
    /// sender's ordering, so both peers authenticate identical bytes.
    pub fn new_receiver(
        self_connection_id: ConnectionId,
        remote_connection_id: ConnectionId,
        self_identity: &IdentityKeyPair,
        self_pre_key: &PreKeyPair,
        remote_identity: VerifyingKey,
        remote_ephemeral: x25519_dalek::PublicKey,
        max_skip: u32,
    ) -> Result<Self, CoreError> {
        let root_key = x3dh::receiver_root_key(self_identity, self_pre_key, &remote_identity, &remote_ephemeral)?;
        let ratchet = RatchetState::receiver_init(
            &root_key,
            self_pre_key.secret().clone(),
            self_pre_key.public(),
            max_skip,
        );

        let mut ad = Vec::with_capacity(64);
        ad.extend_from_slice(&remote_identity.to_bytes());
        ad.extend_from_slice(&self_identity.public_key_bytes());

        debug!(
            self_connection_id = hex::encode(self_connection_id),
            remote_connection_id = hex::encode(remote_connection_id),
            role = "receiver",
            "session established"
        );

        Ok(Self {
            role: Role::Receiver,
            self_connection_id,
            remote_connection_id,
            remote_identity_public: remote_identity.to_bytes(),
            ad,
            remote_key_id: None,
            remote_secret_key_material: None,
            sent_own_material: false,
            ratchet,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn remote_identity_public(&self) -> [u8; 32] {
        self.remote_identity_public
    }

    pub fn remote_key_id(&self) -> Option<u32> {
        self.remote_key_id
    }

    pub fn remote_secret_key_material(&self) -> Option<[u8; 32]> {
        self.remote_secret_key_material
    }

    /// Overwrite the locally recorded view of the peer's `(key_id, sk)`
    /// without going through the ratchet — used when a *different* new
    /// session join requires every existing session's mirror of the peer's
    /// key material to be advanced in lockstep via `SFrameRatchet`.
    pub fn record_advanced_remote_material(&mut self, key_id: u32, secret_key_material: [u8; 32]) {
        self.remote_key_id = Some(key_id);
        self.remote_secret_key_material = Some(secret_key_material);
    }

    /// Whether this session still owes the peer a `CipherMessage`
    /// announcing our own key material (true until the first one is sent).
    pub fn owes_own_material(&self) -> bool {
        !self.sent_own_material
    }

    /// Encrypt `(key_id, secret_key_material)` as the 36-byte inner
    /// plaintext and wrap it in a `CipherMessage` addressed to this peer.
    pub fn encrypt_key_material(&mut self, key_id: u32, secret_key_material: &[u8; 32]) -> Result<CipherMessage, CoreError> {
        let mut plaintext = [0u8; KEY_MATERIAL_LEN];
        plaintext[0..4].copy_from_slice(&key_id.to_be_bytes());
        plaintext[4..36].copy_from_slice(secret_key_material);

        let (header, ciphertext) = self.ratchet.encrypt(&plaintext, &self.ad)?;
        self.sent_own_material = true;

        Ok(CipherMessage {
            src_connection_id: self.self_connection_id,
            dst_connection_id: self.remote_connection_id,
            header,
            ciphertext,
        })
    }

    /// Decrypt an inbound `CipherMessage`, recording and returning the
    /// peer's `(key_id, secret_key_material)`.
    pub fn decrypt_key_material(&mut self, message: &CipherMessage) -> Result<(u32, [u8; 32]), CoreError> {
        let plaintext = self.ratchet.decrypt(message.header, &message.ciphertext, &self.ad)?;
        if plaintext.len() != KEY_MATERIAL_LEN {
            return Err(CoreError::Decode(format!(
                "ratchet plaintext must be {KEY_MATERIAL_LEN} bytes, got {}",
                plaintext.len()
            )));
        }
        let key_id = u32::from_be_bytes(plaintext[0..4].try_into().expect("slice is 4 bytes"));
        let mut secret_key_material = [0u8; 32];
        secret_key_material.copy_from_slice(&plaintext[4..36]);

        self.remote_key_id = Some(key_id);
        self.remote_secret_key_material = Some(secret_key_material);
        Ok((key_id, secret_key_material))
    }
}
