//! Cryptographic primitives: X25519 DH, Ed25519↔X25519 conversion, HKDF,
//! AES-256-GCM, and fingerprints. Everything above this module builds on
//! these functions rather than reaching into the underlying crates directly.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{SigningKey, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroize;

use crate::error::CoreError;

/// AES-256-GCM key, 32 bytes.
pub type AeadKey = [u8; 32];
/// AES-GCM nonce, 12 bytes.
pub type AeadNonce = [u8; 12];

/// X25519 scalar multiplication. `x25519-dalek` already rejects low-order
/// results internally by returning an all-zero shared secret rather than
/// erroring; callers that cannot tolerate a degenerate shared secret must
/// check for it themselves. We surface it as `CryptoDh` so none of this
/// crate's derivations silently proceed on an all-zero DH output.
pub fn dh(
    private: &x25519_dalek::StaticSecret,
    public: &x25519_dalek::PublicKey,
) -> Result<[u8; 32], CoreError> {
    let shared = private.diffie_hellman(public);
    if shared.as_bytes().iter().all(|b| *b == 0) {
        return Err(CoreError::Crypto("X25519 DH produced a degenerate (all-zero) output".into()));
    }
    Ok(*shared.as_bytes())
}

/// Convert an Ed25519 signing key's seed to an X25519 static secret via
/// SHA-512 expansion and RFC 7748 §5 clamping of the low 32 bytes — the
/// same construction used by libsodium's `sign_ed25519_sk_to_curve25519`.
/// Infallible given any valid Ed25519 signing key.
pub fn ed25519_signing_key_to_x25519(signing_key: &SigningKey) -> x25519_dalek::StaticSecret {
    let digest = Sha512::digest(signing_key.to_bytes());
    let mut expanded = [0u8; 64];
    expanded.copy_from_slice(&digest);

    let mut scalar_bytes = [0u8; 32];
    scalar_bytes.copy_from_slice(&expanded[..32]);
    scalar_bytes[0] &= 248;
    scalar_bytes[31] &= 127;
    scalar_bytes[31] |= 64;

    expanded.zeroize();
    let secret = x25519_dalek::StaticSecret::from(scalar_bytes);
    scalar_bytes.zeroize();
    secret
}

/// Convert an Ed25519 verifying key to its X25519 Montgomery counterpart via
/// the standard birational map (decompress the Edwards point, project to
/// its `u`-coordinate). Fails on non-canonical encodings or points that are
/// not on the curve.
pub fn ed25519_verifying_key_to_x25519(
    verifying_key: &VerifyingKey,
) -> Result<x25519_dalek::PublicKey, CoreError> {
    let compressed = CompressedEdwardsY(verifying_key.to_bytes());
    let point = compressed
        .decompress()
        .ok_or_else(|| CoreError::KeyConvert("Ed25519 public key is not a valid curve point".into()))?;
    Ok(x25519_dalek::PublicKey::from(point.to_montgomery().to_bytes()))
}

/// RFC 5869 HKDF-SHA256, extract-then-expand in one call.
pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), CoreError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, out)
        .map_err(|_| CoreError::Crypto("HKDF output length too large for SHA-256".into()))
}

/// `HMAC-SHA256(key, message)`, used by the ratchet's chain-key advancement.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// AES-256-GCM seal. `ad` is authenticated but not encrypted; the 16-byte
/// tag is appended to the returned ciphertext.
pub fn aead_seal(
    key: &AeadKey,
    nonce: &AeadNonce,
    plaintext: &[u8],
    ad: &[u8],
) -> Result<Vec<u8>, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CoreError::Crypto(format!("invalid AES-256-GCM key: {e}")))?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            aes_gcm::aead::Payload { msg: plaintext, aad: ad },
        )
        .map_err(|_| CoreError::Crypto("AES-256-GCM seal failed".into()))
}

/// AES-256-GCM open. Returns `CoreError::Decrypt` on authentication
/// failure, matching the AEAD's constant-time tag comparison.
pub fn aead_open(
    key: &AeadKey,
    nonce: &AeadNonce,
    ciphertext: &[u8],
    ad: &[u8],
) -> Result<Vec<u8>, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CoreError::Crypto(format!("invalid AES-256-GCM key: {e}")))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            aes_gcm::aead::Payload { msg: ciphertext, aad: ad },
        )
        .map_err(|_| CoreError::Decrypt)
}

/// Fill `out` with cryptographically secure random bytes.
pub fn fill_random(out: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(out);
}

/// `SHA-256(pub)` formatted as 32 colon-separated hex byte pairs. Display
/// only; carries no security meaning of its own.
pub fn fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
