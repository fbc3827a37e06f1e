//! Participant identity packets.

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::{Decoder, Encoder};
use crate::error::WireResult;

/// Announce or update the sender's display identity to a call-room peer.
///
/// The fields are presentation-only: they are not required to match any
/// contact-book entry on the receiving side.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantInfoIq {
    /// Envelope request id
    pub request_id: i64,
    /// Call-room member id of the sender
    pub member_id: String,
    /// Display name
    pub name: String,
    /// Optional description line
    pub description: Option<String>,
    /// Optional avatar thumbnail (encoded image bytes)
    pub thumbnail: Option<Bytes>,
}

impl ParticipantInfoIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0xa746b01a_4127_41ea_b30e_ce0a98dbd3df);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_string(&self.member_id);
        enc.put_string(&self.name);
        enc.put_opt_string(self.description.as_deref());
        enc.put_opt_bytes(self.thumbnail.as_deref());
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            member_id: dec.get_string()?,
            name: dec.get_string()?,
            description: dec.get_opt_string()?,
            thumbnail: dec.get_opt_bytes()?,
        })
    }
}

/// Tell the other call legs that the sender is being replaced by member X.
///
/// Sent during a device transfer so that every peer can substitute the
/// outgoing participant with the transfer target instead of rendering a
/// leave-then-join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantTransferIq {
    /// Envelope request id
    pub request_id: i64,
    /// Member id of the replacement
    pub member_id: String,
}

impl ParticipantTransferIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x33c391da_6bc0_4a97_8040_c20ed7e0a318);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_string(&self.member_id);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            member_id: dec.get_string()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::IqMessage;

    #[test]
    fn test_participant_info_round_trip_all_fields() {
        let m = ParticipantInfoIq {
            request_id: 41,
            member_id: "member-7".to_string(),
            name: "Alice".to_string(),
            description: Some("on mobile".to_string()),
            thumbnail: Some(Bytes::from_static(&[0xca, 0xfe])),
        };
        let decoded = IqMessage::decode(m.encode()).unwrap();
        assert_eq!(decoded, IqMessage::ParticipantInfo(m));
    }

    #[test]
    fn test_participant_info_round_trip_optionals_absent() {
        let m = ParticipantInfoIq {
            request_id: 0,
            member_id: "m".to_string(),
            name: String::new(),
            description: None,
            thumbnail: None,
        };
        let decoded = IqMessage::decode(m.encode()).unwrap();
        assert_eq!(decoded, IqMessage::ParticipantInfo(m));
    }

    #[test]
    fn test_participant_transfer_round_trip() {
        let m = ParticipantTransferIq {
            request_id: 9,
            member_id: "member-new".to_string(),
        };
        let decoded = IqMessage::decode(m.encode()).unwrap();
        assert_eq!(decoded, IqMessage::ParticipantTransfer(m));
    }
}
