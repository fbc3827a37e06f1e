//! End-to-end key verification packets.
//!
//! The word-based verification handshake runs over the same envelope as the
//! call sideband. The call engine relays these to the verification layer as
//! events; the cryptographic protocol itself lives outside this crate.

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::{Decoder, Encoder};
use crate::error::WireResult;

/// Start the word-check handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCheckInitiateIq {
    /// Envelope request id
    pub request_id: i64,
    /// Initiator commitment nonce
    pub nonce: Bytes,
}

impl KeyCheckInitiateIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0xcf4db6f3_2596_4461_9a00_b3fdda8f5b53);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_bytes(&self.nonce);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            nonce: dec.get_bytes()?,
        })
    }
}

/// Handshake acknowledgement with the responder nonce.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCheckOnInitiateIq {
    /// Envelope request id
    pub request_id: i64,
    /// Responder commitment nonce
    pub nonce: Bytes,
}

impl KeyCheckOnInitiateIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0xb889c111_b73b_43a5_9787_bd480b1b328e);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_bytes(&self.nonce);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            nonce: dec.get_bytes()?,
        })
    }
}

/// Per-word confirmation during the verification dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCheckWordCheckIq {
    /// Envelope request id
    pub request_id: i64,
    /// Index of the word being confirmed
    pub word_index: i32,
    /// Whether the user confirmed the word matches
    pub accepted: bool,
}

impl KeyCheckWordCheckIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0xf925db78_91f3_4a47_9085_21dc6e57efb7);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_i32(self.word_index);
        enc.put_bool(self.accepted);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            word_index: dec.get_i32()?,
            accepted: dec.get_bool()?,
        })
    }
}

/// Handshake outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCheckTerminateIq {
    /// Envelope request id
    pub request_id: i64,
    /// Whether verification succeeded
    pub success: bool,
}

impl KeyCheckTerminateIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x6d02d590_9996_4d35_bb8b_07175f440075);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_bool(self.success);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            success: dec.get_bool()?,
        })
    }
}

/// Twincode URI exchanged during key verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwincodeUriIq {
    /// Envelope request id
    pub request_id: i64,
    /// Opaque twincode routing URI
    pub uri: String,
}

impl TwincodeUriIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x0b1524ee_91c0_4722_b7a2_0160f5acbf23);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_string(&self.uri);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            uri: dec.get_string()?,
        })
    }
}
