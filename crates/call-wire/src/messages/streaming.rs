//! Media streaming side-channel packets.
//!
//! A sibling protocol family reusing the IQ envelope: one peer streams a
//! media file to the other over the data channel. The call engine only
//! relays these between the wire and the streaming session; it never looks
//! inside the payload chunks.

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::{Decoder, Encoder};
use crate::error::{WireError, WireResult};

/// Streaming control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingOp {
    /// Start playback
    Start = 0,
    /// Pause playback, keeping the session
    Pause = 1,
    /// Resume a paused session
    Resume = 2,
    /// Stop and discard the session
    Stop = 3,
    /// Seek to `position_ms`
    Seek = 4,
}

impl StreamingOp {
    fn from_tag(tag: i32) -> WireResult<Self> {
        match tag {
            0 => Ok(StreamingOp::Start),
            1 => Ok(StreamingOp::Pause),
            2 => Ok(StreamingOp::Resume),
            3 => Ok(StreamingOp::Stop),
            4 => Ok(StreamingOp::Seek),
            value => Err(WireError::InvalidEnumValue {
                name: "StreamingOp",
                value,
            }),
        }
    }
}

/// Streaming session control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingControlIq {
    /// Envelope request id
    pub request_id: i64,
    /// Requested operation
    pub op: StreamingOp,
    /// Playback position in milliseconds (meaningful for Start/Seek)
    pub position_ms: i64,
}

impl StreamingControlIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0xcc8dcade_9f7b_4b16_9156_a39daabc4a5f);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_enum(self.op as i32);
        enc.put_i64(self.position_ms);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            op: StreamingOp::from_tag(dec.get_enum()?)?,
            position_ms: dec.get_i64()?,
        })
    }
}

/// One chunk of streamed media data.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingDataIq {
    /// Envelope request id
    pub request_id: i64,
    /// Chunk sequence number, starting at 0
    pub sequence: i64,
    /// Opaque media bytes
    pub payload: Bytes,
}

impl StreamingDataIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x8180a84f_035b_4087_813c_50c19507de3f);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_i64(self.sequence);
        enc.put_bytes(&self.payload);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            sequence: dec.get_i64()?,
            payload: dec.get_bytes()?,
        })
    }
}

/// Description of the track being streamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingInfoIq {
    /// Envelope request id
    pub request_id: i64,
    /// Track title, when known
    pub title: Option<String>,
    /// Track duration in milliseconds, 0 when unknown
    pub duration_ms: i64,
    /// MIME type, when known
    pub mime_type: Option<String>,
}

impl StreamingInfoIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0xb53d0ed7_e038_42c7_a7f9_342def1cba5b);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_opt_string(self.title.as_deref());
        enc.put_i64(self.duration_ms);
        enc.put_opt_string(self.mime_type.as_deref());
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            title: dec.get_opt_string()?,
            duration_ms: dec.get_i64()?,
            mime_type: dec.get_opt_string()?,
        })
    }
}

/// Receiver-side pull request (re-request data from a position).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingRequestIq {
    /// Envelope request id
    pub request_id: i64,
    /// Position to stream from, in milliseconds
    pub position_ms: i64,
}

impl StreamingRequestIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x7ccac643_5a7e_4ffc_823b_8ab31ddc22c3);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_i64(self.position_ms);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            position_ms: dec.get_i64()?,
        })
    }
}
