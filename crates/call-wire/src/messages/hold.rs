//! Peer hold/resume notification packets.
//!
//! These signal the peer's hold state, which is tracked independently of
//! the local on-hold flag. Both are empty notifications.

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::Encoder;

/// The peer put this call on hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldCallIq {
    /// Envelope request id
    pub request_id: i64,
}

impl HoldCallIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x2b130c64_80f9_472a_b180_064fceb6980c);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id).finish()
    }
}

/// The peer resumed this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeCallIq {
    /// Envelope request id
    pub request_id: i64,
}

impl ResumeCallIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x10bd1f4e_5ce0_487e_a8ca_3725a3a49324);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id).finish()
    }
}
