use thiserror::Error;

/// Everything that can go wrong in the handshake, ratchet, or group key
/// lifecycle. Every public fallible function in this crate returns
/// `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed frame: {0}")]
    Decode(String),

    #[error("pre-key bundle signature verification failed")]
    Verify,

    #[error("PreKeyMessage identity key does not match the installed bundle for {0}")]
    UnmatchIdentityKey(String),

    #[error("no pre-key bundle installed for peer {0}")]
    MissingPreKeyBundle(String),

    #[error("a pre-key bundle is already installed for peer {0}")]
    AlreadyExistRemotePreKeyBundle(String),

    #[error("no session exists for peer {0}")]
    MissingSession(String),

    #[error("a session already exists for peer {0}")]
    SessionAlreadyExists(String),

    #[error("AEAD authentication failed")]
    Decrypt,

    #[error("skip of {requested} messages exceeds max_skip ({max_skip})")]
    TooManySkipped { requested: u32, max_skip: u32 },

    #[error("Ed25519 to X25519 key conversion failed: {0}")]
    KeyConvert(String),

    #[error("cryptographic primitive failure: {0}")]
    Crypto(String),

    #[error("unknown message type byte {0}")]
    UnknownMessage(u8),
}

impl From<ed25519_dalek::SignatureError> for CoreError {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        CoreError::Verify
    }
}

impl From<aes_gcm::Error> for CoreError {
    fn from(_: aes_gcm::Error) -> Self {
        CoreError::Decrypt
    }
}
