//! Device-transfer handshake packets.
//!
//! The transfer protocol is two phases carried by three messages:
//! the transferring device sends [`PrepareTransferIq`] to every existing
//! participant, each one acks with [`OnPrepareTransferIq`], and once the
//! transfer target is directly connected it sends [`TransferDoneIq`] so the
//! outgoing device knows it may disconnect. All three are empty: the
//! envelope alone carries the meaning.

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::Encoder;

/// Phase 1: forewarn an existing participant that a transfer target is
/// about to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareTransferIq {
    /// Envelope request id
    pub request_id: i64,
}

impl PrepareTransferIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0xef8eb082_d1c3_4a4a_8144_e13a43be411e);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id).finish()
    }
}

/// Phase 1 acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnPrepareTransferIq {
    /// Envelope request id
    pub request_id: i64,
}

impl OnPrepareTransferIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x6920e483_294e_4ceb_b254_017d81e99e26);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id).finish()
    }
}

/// Phase 2: the transfer target tells the outgoing device it may disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferDoneIq {
    /// Envelope request id
    pub request_id: i64,
}

impl TransferDoneIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x44530e43_cec8_448a_b29c_2fd390e44a96);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id).finish()
    }
}
