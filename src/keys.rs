//! Long-lived key material: the Ed25519 identity key pair, the X25519
//! signed pre-key pair, and the signed bundle a peer publishes so others
//! can start a session without an online round trip.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::CoreError;
use crate::primitives::{ed25519_signing_key_to_x25519, ed25519_verifying_key_to_x25519, fingerprint};

/// A participant's long-term identity: an Ed25519 signing key pair whose
/// public half doubles as the participant's address and whose private half
/// additionally seeds an X25519 static secret for X3DH.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verify(
        public_key: &VerifyingKey,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), CoreError> {
        public_key.verify(message, signature).map_err(CoreError::from)
    }

    /// This identity's X25519 static secret, for use in X3DH.
    pub fn to_x25519_secret(&self) -> x25519_dalek::StaticSecret {
        ed25519_signing_key_to_x25519(&self.signing_key)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key_bytes())
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish()
    }
}

/// The X25519 signed pre-key pair. Long-lived for the lifetime of a
/// `Participant`; rotation is not implemented here.
#[derive(ZeroizeOnDrop)]
pub struct PreKeyPair {
    secret: x25519_dalek::StaticSecret,
    #[zeroize(skip)]
    public: x25519_dalek::PublicKey,
}

impl PreKeyPair {
    pub fn generate() -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn secret(&self) -> &x25519_dalek::StaticSecret {
        &self.secret
    }

    pub fn public(&self) -> x25519_dalek::PublicKey {
        self.public
    }
}

/// The public material a peer publishes so others can initiate a session
/// without an online exchange: an identity key, a signed pre-key, and the
/// signature binding them together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub identity_key: [u8; 32],
    pub signed_pre_key: [u8; 32],
    pub pre_key_signature: [u8; 64],
}

impl PreKeyBundle {
    /// Build and sign a bundle from this participant's own identity and
    /// pre-key pairs.
    pub fn generate(identity: &IdentityKeyPair, pre_key: &PreKeyPair) -> Self {
        let signed_pre_key = pre_key.public().to_bytes();
        let signature = identity.sign(&signed_pre_key);
        Self {
            identity_key: identity.public_key_bytes(),
            signed_pre_key,
            pre_key_signature: signature.to_bytes(),
        }
    }

    /// Verify `pre_key_signature` over `signed_pre_key` under `identity_key`.
    /// Must succeed before the bundle is used in X3DH.
    pub fn verify(&self) -> Result<(), CoreError> {
        let identity_key = VerifyingKey::from_bytes(&self.identity_key)
            .map_err(|e| CoreError::KeyConvert(e.to_string()))?;
        let signature = Signature::from_bytes(&self.pre_key_signature);
        IdentityKeyPair::verify(&identity_key, &self.signed_pre_key, &signature)
    }

    pub fn identity_verifying_key(&self) -> Result<VerifyingKey, CoreError> {
        VerifyingKey::from_bytes(&self.identity_key).map_err(|e| CoreError::KeyConvert(e.to_string()))
    }

    pub fn identity_x25519(&self) -> Result<x25519_dalek::PublicKey, CoreError> {
        ed25519_verifying_key_to_x25519(&self.identity_verifying_key()?)
    }

    pub fn signed_pre_key_x25519(&self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.signed_pre_key)
    }
}

/// A freshly generated X25519 key pair used once per outbound session
/// attempt and discarded after root-key derivation.
pub struct EphemeralKeyPair {
    pub secret: x25519_dalek::StaticSecret,
    pub public: x25519_dalek::PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self { secret, public }
    }
}
