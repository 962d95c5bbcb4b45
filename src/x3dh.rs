//! The three-DH handshake (X3DH without one-time pre-keys) that bootstraps
//! a session's root key. Both roles must derive byte-identical root keys
//! from their respective halves of the same three Diffie-Hellman outputs.

use crate::error::CoreError;
use crate::keys::{EphemeralKeyPair, IdentityKeyPair, PreKeyBundle, PreKeyPair};
use crate::primitives::{dh, hkdf_sha256};

const ROOT_KEY_INFO: &[u8] = b"SoraText";

/// Derive the 32-byte root key from the three concatenated DH outputs.
/// `secret` is `DH1 ∥ DH2 ∥ DH3`, 96 bytes.
fn derive_root_key(secret: &[u8; 96]) -> Result<[u8; 32], CoreError> {
    let mut root_key = [0u8; 32];
    hkdf_sha256(&[0u8; 32], secret, ROOT_KEY_INFO, &mut root_key)?;
    Ok(root_key)
}

/// Initiator side. `self_identity`/`self_ephemeral` are ours; `remote_bundle`
/// is the responder's verified `PreKeyBundle`. Returns the shared root key.
pub fn sender_root_key(
    self_identity: &IdentityKeyPair,
    self_ephemeral: &EphemeralKeyPair,
    remote_bundle: &PreKeyBundle,
) -> Result<[u8; 32], CoreError> {
    let self_identity_x = self_identity.to_x25519_secret();
    let remote_identity_x = remote_bundle.identity_x25519()?;
    let remote_signed_pre_key = remote_bundle.signed_pre_key_x25519();

    let dh1 = dh(&self_identity_x, &remote_signed_pre_key)?;
    let dh2 = dh(&self_ephemeral.secret, &remote_identity_x)?;
    let dh3 = dh(&self_ephemeral.secret, &remote_signed_pre_key)?;

    let mut secret = [0u8; 96];
    secret[0..32].copy_from_slice(&dh1);
    secret[32..64].copy_from_slice(&dh2);
    secret[64..96].copy_from_slice(&dh3);
    derive_root_key(&secret)
}

/// Responder side. `self_identity`/`self_pre_key` are ours; `remote_identity`
/// is the initiator's Ed25519 public key and `remote_ephemeral` is the
/// ephemeral public key carried in the inbound `PreKeyMessage`.
pub fn receiver_root_key(
    self_identity: &IdentityKeyPair,
    self_pre_key: &PreKeyPair,
    remote_identity: &ed25519_dalek::VerifyingKey,
    remote_ephemeral: &x25519_dalek::PublicKey,
) -> Result<[u8; 32], CoreError> {
    let self_identity_x = self_identity.to_x25519_secret();
    let remote_identity_x = crate::primitives::ed25519_verifying_key_to_x25519(remote_identity)?;

    let dh1 = dh(self_pre_key.secret(), &remote_identity_x)?;
    let dh2 = dh(&self_identity_x, remote_ephemeral)?;
    let dh3 = dh(self_pre_key.secret(), remote_ephemeral)?;

    let mut secret = [0u8; 96];
    secret[0..32].copy_from_slice(&dh1);
    secret[32..64].copy_from_slice(&dh2);
    secret[64..96].copy_from_slice(&dh3);
    derive_root_key(&secret)
}
