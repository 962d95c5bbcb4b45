//! Byte-exact encode/decode of the two control message frames. Both share
//! a 4-byte prefix (`type`, `reserved`, `ciphertext_length`) and carry two
//! 26-byte opaque connection ids. No textual encoding happens at this
//! layer — callers that need base64 or similar do it themselves.

use crate::error::CoreError;
use crate::ratchet::{RatchetHeader, HEADER_LEN};

/// An opaque 26-byte connection identifier, compared bytewise.
pub type ConnectionId = [u8; 26];

const PREFIX_LEN: usize = 4;
const CONN_ID_LEN: usize = 26;

const TYPE_PRE_KEY: u8 = 0;
const TYPE_CIPHER: u8 = 1;

/// `PreKeyMessage`: announces an initiator's identity and ephemeral key to
/// a specific peer. Always 120 bytes on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyMessage {
    pub src_connection_id: ConnectionId,
    pub dst_connection_id: ConnectionId,
    pub identity_key: [u8; 32],
    pub ephemeral_key: [u8; 32],
}

impl PreKeyMessage {
    pub const WIRE_LEN: usize = PREFIX_LEN + CONN_ID_LEN * 2 + 32 + 32;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_LEN);
        out.push(TYPE_PRE_KEY);
        out.push(0);
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.src_connection_id);
        out.extend_from_slice(&self.dst_connection_id);
        out.extend_from_slice(&self.identity_key);
        out.extend_from_slice(&self.ephemeral_key);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != Self::WIRE_LEN {
            return Err(CoreError::Decode(format!(
                "PreKeyMessage must be {} bytes, got {}",
                Self::WIRE_LEN,
                bytes.len()
            )));
        }
        if bytes[0] != TYPE_PRE_KEY {
            return Err(CoreError::UnknownMessage(bytes[0]));
        }
        let mut offset = PREFIX_LEN;
        let src_connection_id = read_conn_id(bytes, &mut offset);
        let dst_connection_id = read_conn_id(bytes, &mut offset);
        let identity_key = read_array::<32>(bytes, &mut offset);
        let ephemeral_key = read_array::<32>(bytes, &mut offset);
        Ok(Self {
            src_connection_id,
            dst_connection_id,
            identity_key,
            ephemeral_key,
        })
    }
}

/// `CipherMessage`: a ratchet-encrypted application payload (here, always
/// the 36-byte `key_id ∥ secret_key_material` plaintext described in
/// `crate::participant`). `96 + ciphertext.len()` bytes on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherMessage {
    pub src_connection_id: ConnectionId,
    pub dst_connection_id: ConnectionId,
    pub header: RatchetHeader,
    pub ciphertext: Vec<u8>,
}

impl CipherMessage {
    const FIXED_LEN: usize = PREFIX_LEN + CONN_ID_LEN * 2 + HEADER_LEN;

    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let ciphertext_length: u16 = self
            .ciphertext
            .len()
            .try_into()
            .map_err(|_| CoreError::Decode("ciphertext exceeds u16::MAX bytes".into()))?;

        let mut out = Vec::with_capacity(Self::FIXED_LEN + self.ciphertext.len());
        out.push(TYPE_CIPHER);
        out.push(0);
        out.extend_from_slice(&ciphertext_length.to_be_bytes());
        out.extend_from_slice(&self.src_connection_id);
        out.extend_from_slice(&self.dst_connection_id);
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.ciphertext);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < PREFIX_LEN {
            return Err(CoreError::Decode("frame shorter than the 4-byte prefix".into()));
        }
        if bytes[0] != TYPE_CIPHER {
            return Err(CoreError::UnknownMessage(bytes[0]));
        }
        let ciphertext_length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if bytes.len() != Self::FIXED_LEN + ciphertext_length {
            return Err(CoreError::Decode(format!(
                "CipherMessage declares {ciphertext_length}-byte ciphertext but frame is {} bytes",
                bytes.len()
            )));
        }

        let mut offset = PREFIX_LEN;
        let src_connection_id = read_conn_id(bytes, &mut offset);
        let dst_connection_id = read_conn_id(bytes, &mut offset);
        let dh = read_array::<32>(bytes, &mut offset);
        let pn = u32::from_be_bytes(read_array::<4>(bytes, &mut offset));
        let n = u32::from_be_bytes(read_array::<4>(bytes, &mut offset));
        let ciphertext = bytes[offset..].to_vec();

        Ok(Self {
            src_connection_id,
            dst_connection_id,
            header: RatchetHeader { dh, pn, n },
            ciphertext,
        })
    }
}

/// Dispatch on the shared 4-byte prefix's `type` field without committing
/// to a concrete message type; returns the type byte and fails fast on an
/// impossibly short frame.
pub fn peek_type(bytes: &[u8]) -> Result<u8, CoreError> {
    if bytes.len() < PREFIX_LEN {
        return Err(CoreError::Decode("frame shorter than the 4-byte prefix".into()));
    }
    Ok(bytes[0])
}

fn read_conn_id(bytes: &[u8], offset: &mut usize) -> ConnectionId {
    read_array::<CONN_ID_LEN>(bytes, offset)
}

fn read_array<const N: usize>(bytes: &[u8], offset: &mut usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[*offset..*offset + N]);
    *offset += N;
    out
}
