//! End-to-end encryption core for a multi-party conferencing signaling
//! channel: a three-DH handshake (X3DH without one-time pre-keys), a
//! Double Ratchet for pairwise message confidentiality, and the group
//! secret-key-material lifecycle layered over those pairwise sessions.
//!
//! The crate is transport-, storage-, and platform-agnostic: every
//! operation is synchronous, takes and returns plain byte buffers or
//! value types, and persists nothing. Wiring this up to a network and a
//! media pipeline is the embedding application's job.

pub mod error;
pub mod keys;
pub mod participant;
pub mod primitives;
pub mod ratchet;
pub mod session;
pub mod wire;
pub mod x3dh;

pub use error::CoreError;
pub use keys::{EphemeralKeyPair, IdentityKeyPair, PreKeyBundle, PreKeyPair};
pub use participant::{OutboundMessage, Participant, ParticipantConfig, ReceiveResult, StartSessionResult, StopSessionResult};
pub use session::{Role, Session};
pub use wire::{CipherMessage, ConnectionId, PreKeyMessage};
