//! The Double Ratchet: a DH ratchet performed on every peer-initiated key
//! change, layered with a symmetric KDF ratchet advanced on every message.
//! Provides forward secrecy (old chain keys cannot derive new ones) and
//! post-compromise security (a fresh DH step heals a compromised chain).

use std::collections::HashMap;

use rand::rngs::OsRng;

use crate::error::CoreError;
use crate::keys::PreKeyBundle;
use crate::primitives::{dh, hkdf_sha256, hmac_sha256};

const ROOT_KDF_INFO: &[u8] = b"SoraRatchet";
const MESSAGE_KDF_INFO: &[u8] = b"SoraMessageKeys";
const CHAIN_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_ADVANCE: u8 = 0x02;

/// Number of skipped-message keys a single chain will cache before refusing
/// to skip further. A configurable safety parameter, not a protocol
/// constant — see [`crate::ParticipantConfig`].
pub const DEFAULT_MAX_SKIP: u32 = 10;

/// An X25519 key pair produced on each DH-ratchet step.
struct RatchetKeyPair {
    secret: x25519_dalek::StaticSecret,
    public: x25519_dalek::PublicKey,
}

impl RatchetKeyPair {
    fn generate() -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self { secret, public }
    }

    fn reuse(secret: x25519_dalek::StaticSecret, public: x25519_dalek::PublicKey) -> Self {
        Self { secret, public }
    }
}

/// A single-use AES-256-GCM key and nonce derived from a chain key.
#[derive(Clone, Copy)]
struct MessageKey {
    key: [u8; 32],
    nonce: [u8; 12],
}

/// Fed into the AEAD as the AD suffix (concatenated after the session's
/// direction-ordered identity-key AD), and carried on the wire as the
/// `ratchet_key`/`pn`/`n` fields of a `CipherMessage`: the sender's current
/// ratchet public key, its previous chain's length, and the index of this
/// message within its chain.
pub const HEADER_LEN: usize = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatchetHeader {
    pub dh: [u8; 32],
    pub pn: u32,
    pub n: u32,
}

impl RatchetHeader {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..32].copy_from_slice(&self.dh);
        out[32..36].copy_from_slice(&self.pn.to_be_bytes());
        out[36..40].copy_from_slice(&self.n.to_be_bytes());
        out
    }
}

fn kdf_rk(root_key: &[u8; 32], dh_output: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CoreError> {
    let mut out = [0u8; 64];
    hkdf_sha256(root_key, dh_output, ROOT_KDF_INFO, &mut out)?;
    let mut new_root = [0u8; 32];
    let mut chain_key = [0u8; 32];
    new_root.copy_from_slice(&out[0..32]);
    chain_key.copy_from_slice(&out[32..64]);
    Ok((new_root, chain_key))
}

fn kdf_ck(chain_key: &[u8; 32]) -> Result<MessageKey, CoreError> {
    let seed = hmac_sha256(chain_key, &[CHAIN_KEY_SEED]);
    let mut out = [0u8; 44];
    hkdf_sha256(&[0u8; 44], &seed, MESSAGE_KDF_INFO, &mut out)?;
    let mut key = [0u8; 32];
    let mut nonce = [0u8; 12];
    key.copy_from_slice(&out[0..32]);
    nonce.copy_from_slice(&out[32..44]);
    Ok(MessageKey { key, nonce })
}

fn advance_chain_key(chain_key: &[u8; 32]) -> [u8; 32] {
    hmac_sha256(chain_key, &[CHAIN_KEY_ADVANCE])
}

/// State for one direction-pair of a pairwise session's symmetric ratchet,
/// plus the bounded cache of keys skipped past during out-of-order
/// delivery.
pub struct RatchetState {
    self_dh: RatchetKeyPair,
    remote_dh: Option<[u8; 32]>,
    root_key: [u8; 32],
    self_chain_key: Option<[u8; 32]>,
    remote_chain_key: Option<[u8; 32]>,
    self_n: u32,
    remote_n: u32,
    pn: u32,
    skipped: HashMap<([u8; 32], u32), MessageKey>,
    max_skip: u32,
}

impl RatchetState {
    /// Initiator side: a fresh ratchet key pair is generated and the first
    /// DH step is taken against the peer's signed pre-key.
    pub fn sender_init(root_secret: &[u8; 32], bundle: &PreKeyBundle, max_skip: u32) -> Result<Self, CoreError> {
        let self_dh = RatchetKeyPair::generate();
        let remote_dh = bundle.signed_pre_key;
        let dh_output = dh(&self_dh.secret, &bundle.signed_pre_key_x25519())?;
        let (root_key, self_chain_key) = kdf_rk(root_secret, &dh_output)?;

        Ok(Self {
            self_dh,
            remote_dh: Some(remote_dh),
            root_key,
            self_chain_key: Some(self_chain_key),
            remote_chain_key: None,
            self_n: 0,
            remote_n: 0,
            pn: 0,
            skipped: HashMap::new(),
            max_skip,
        })
    }

    /// Responder side: the signed pre-key pair is reused directly as the
    /// first ratchet key, and the root key is the X3DH output untouched.
    /// The first inbound header is guaranteed to carry a different DH
    /// value, which triggers the very first DH-ratchet step.
    pub fn receiver_init(
        root_secret: &[u8; 32],
        pre_key_secret: x25519_dalek::StaticSecret,
        pre_key_public: x25519_dalek::PublicKey,
        max_skip: u32,
    ) -> Self {
        Self {
            self_dh: RatchetKeyPair::reuse(pre_key_secret, pre_key_public),
            remote_dh: None,
            root_key: *root_secret,
            self_chain_key: None,
            remote_chain_key: None,
            self_n: 0,
            remote_n: 0,
            pn: 0,
            skipped: HashMap::new(),
            max_skip,
        }
    }

    /// Encrypt `plaintext`, returning the header to send alongside the
    /// ciphertext and the ciphertext itself (tag included).
    pub fn encrypt(&mut self, plaintext: &[u8], ad: &[u8]) -> Result<(RatchetHeader, Vec<u8>), CoreError> {
        let chain_key = self
            .self_chain_key
            .ok_or_else(|| CoreError::Crypto("sending chain key is not yet established".into()))?;
        let message_key = kdf_ck(&chain_key)?;
        self.self_chain_key = Some(advance_chain_key(&chain_key));

        let header = RatchetHeader {
            dh: *self.self_dh.public.as_bytes(),
            pn: self.pn,
            n: self.self_n,
        };
        self.self_n += 1;

        let mut authenticated = ad.to_vec();
        authenticated.extend_from_slice(&header.to_bytes());
        let ciphertext = crate::primitives::aead_seal(&message_key.key, &message_key.nonce, plaintext, &authenticated)?;
        Ok((header, ciphertext))
    }

    /// Decrypt a message carrying `header` and `ciphertext`, performing a
    /// DH-ratchet step and/or skipping ahead in the receiving chain as
    /// needed.
    pub fn decrypt(&mut self, header: RatchetHeader, ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CoreError> {
        let mut authenticated = ad.to_vec();
        authenticated.extend_from_slice(&header.to_bytes());

        if let Some(message_key) = self.skipped.remove(&(header.dh, header.n)) {
            return crate::primitives::aead_open(&message_key.key, &message_key.nonce, ciphertext, &authenticated);
        }

        if self.remote_dh != Some(header.dh) {
            self.skip_message_keys(header.pn)?;
            self.dh_ratchet(header.dh)?;
        }

        self.skip_message_keys(header.n)?;

        let chain_key = self
            .remote_chain_key
            .ok_or_else(|| CoreError::Crypto("receiving chain key is not yet established".into()))?;
        let message_key = kdf_ck(&chain_key)?;
        self.remote_chain_key = Some(advance_chain_key(&chain_key));
        self.remote_n += 1;

        crate::primitives::aead_open(&message_key.key, &message_key.nonce, ciphertext, &authenticated)
    }

    fn dh_ratchet(&mut self, new_remote_dh: [u8; 32]) -> Result<(), CoreError> {
        self.pn = self.self_n;
        self.self_n = 0;
        self.remote_n = 0;
        self.remote_dh = Some(new_remote_dh);

        let remote_public = x25519_dalek::PublicKey::from(new_remote_dh);
        let dh_to_remote = dh(&self.self_dh.secret, &remote_public)?;
        let (root_key, remote_chain_key) = kdf_rk(&self.root_key, &dh_to_remote)?;
        self.root_key = root_key;
        self.remote_chain_key = Some(remote_chain_key);

        self.self_dh = RatchetKeyPair::generate();
        let dh_from_self = dh(&self.self_dh.secret, &remote_public)?;
        let (root_key, self_chain_key) = kdf_rk(&self.root_key, &dh_from_self)?;
        self.root_key = root_key;
        self.self_chain_key = Some(self_chain_key);

        Ok(())
    }

    fn skip_message_keys(&mut self, until: u32) -> Result<(), CoreError> {
        if until.saturating_sub(self.remote_n) > self.max_skip {
            return Err(CoreError::TooManySkipped {
                requested: until - self.remote_n,
                max_skip: self.max_skip,
            });
        }
        let Some(mut chain_key) = self.remote_chain_key else {
            return Ok(());
        };
        let remote_dh = self.remote_dh.expect("remote_chain_key implies remote_dh is set");
        while self.remote_n < until {
            let message_key = kdf_ck(&chain_key)?;
            self.skipped.insert((remote_dh, self.remote_n), message_key);
            chain_key = advance_chain_key(&chain_key);
            self.remote_n += 1;
        }
        self.remote_chain_key = Some(chain_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{EphemeralKeyPair, IdentityKeyPair, PreKeyPair};

    fn init_pair(max_skip: u32) -> (RatchetState, RatchetState) {
        let bob_identity = IdentityKeyPair::generate();
        let bob_pre_key = PreKeyPair::generate();
        let bundle = PreKeyBundle::generate(&bob_identity, &bob_pre_key);

        let alice_identity = IdentityKeyPair::generate();
        let alice_ephemeral = EphemeralKeyPair::generate();
        let root = crate::x3dh::sender_root_key(&alice_identity, &alice_ephemeral, &bundle).unwrap();
        let root_b = crate::x3dh::receiver_root_key(
            &bob_identity,
            &bob_pre_key,
            &alice_identity.public_key(),
            &alice_ephemeral.public,
        )
        .unwrap();
        assert_eq!(root, root_b);

        let sender = RatchetState::sender_init(&root, &bundle, max_skip).unwrap();
        let receiver = RatchetState::receiver_init(
            &root_b,
            bob_pre_key.secret().clone(),
            bob_pre_key.public(),
            max_skip,
        );
        (sender, receiver)
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let (mut alice, mut bob) = init_pair(DEFAULT_MAX_SKIP);
        let ad = b"associated data";

        let (header, ct) = alice.encrypt(b"hello bob", ad).unwrap();
        let pt = bob.decrypt(header, &ct, ad).unwrap();
        assert_eq!(pt, b"hello bob");
    }

    #[test]
    fn bidirectional_exchange_triggers_dh_ratchet() {
        let (mut alice, mut bob) = init_pair(DEFAULT_MAX_SKIP);
        let ad = b"ad";

        let (h1, c1) = alice.encrypt(b"one", ad).unwrap();
        assert_eq!(bob.decrypt(h1, &c1, ad).unwrap(), b"one");

        let (h2, c2) = bob.encrypt(b"two", ad).unwrap();
        assert_eq!(alice.decrypt(h2, &c2, ad).unwrap(), b"two");

        let (h3, c3) = alice.encrypt(b"three", ad).unwrap();
        assert_eq!(bob.decrypt(h3, &c3, ad).unwrap(), b"three");
    }

    #[test]
    fn out_of_order_within_window_all_recovered() {
        let (mut alice, mut bob) = init_pair(DEFAULT_MAX_SKIP);
        let ad = b"ad";

        let m1 = alice.encrypt(b"m1", ad).unwrap();
        let m2 = alice.encrypt(b"m2", ad).unwrap();
        let m3 = alice.encrypt(b"m3", ad).unwrap();

        assert_eq!(bob.decrypt(m1.0, &m1.1, ad).unwrap(), b"m1");
        assert_eq!(bob.decrypt(m3.0, &m3.1, ad).unwrap(), b"m3");
        assert_eq!(bob.decrypt(m2.0, &m2.1, ad).unwrap(), b"m2");
    }

    #[test]
    fn skip_overflow_fails() {
        let (mut alice, mut bob) = init_pair(10);
        let ad = b"ad";

        let mut last = None;
        for i in 0..20u32 {
            let (h, c) = alice.encrypt(format!("m{i}").as_bytes(), ad).unwrap();
            last = Some((h, c));
        }
        let (header, ciphertext) = last.unwrap();
        let err = bob.decrypt(header, &ciphertext, ad).unwrap_err();
        assert!(matches!(err, CoreError::TooManySkipped { .. }));
    }

    #[test]
    fn tampered_ciphertext_fails_decrypt() {
        let (mut alice, mut bob) = init_pair(DEFAULT_MAX_SKIP);
        let ad = b"ad";
        let (header, mut ct) = alice.encrypt(b"hello", ad).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(bob.decrypt(header, &ct, ad).is_err());
    }
}
