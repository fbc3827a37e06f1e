//! Shared binary encoder/decoder for IQ packets.
//!
//! Every IQ packet starts with the same envelope: a 128-bit schema id, an
//! i32 schema version and an i64 request id, followed by the message fields
//! in catalog order. All integers are big-endian. Strings carry a u32 length
//! prefix and UTF-8 bytes. Optional fields carry a one-byte presence flag.
//! Closed enumerations are encoded as an i32 tag; an unrecognized tag is a
//! hard decode fault.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::{WireError, WireResult};

/// Sanity bound for length-prefixed fields (strings, byte arrays).
/// IQ packets travel over a data channel and are small; anything beyond
/// this is a corrupt or hostile frame.
const MAX_FIELD_LEN: u32 = 16 * 1024 * 1024;

/// The fixed envelope carried by every IQ packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Stable 128-bit schema id identifying the message type
    pub schema_id: Uuid,
    /// Schema version for this message type
    pub schema_version: i32,
    /// Request id for response correlation
    pub request_id: i64,
}

/// Binary encoder for one IQ packet.
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Start encoding a packet with the given envelope.
    pub fn new(schema_id: Uuid, schema_version: i32, request_id: i64) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(schema_id.as_bytes());
        buf.put_i32(schema_version);
        buf.put_i64(request_id);
        Self { buf }
    }

    /// Append a signed 32-bit integer.
    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Append a signed 64-bit integer.
    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// Append a boolean as a single byte (0 or 1).
    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Append an IEEE-754 double.
    pub fn put_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    /// Append a UTF-8 string with a u32 length prefix.
    pub fn put_string(&mut self, value: &str) {
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Append an optional string (presence byte, then the string).
    pub fn put_opt_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.buf.put_u8(1);
                self.put_string(s);
            }
            None => self.buf.put_u8(0),
        }
    }

    /// Append a byte array with a u32 length prefix.
    pub fn put_bytes(&mut self, value: &[u8]) {
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
    }

    /// Append an optional byte array (presence byte, then the array).
    pub fn put_opt_bytes(&mut self, value: Option<&[u8]>) {
        match value {
            Some(b) => {
                self.buf.put_u8(1);
                self.put_bytes(b);
            }
            None => self.buf.put_u8(0),
        }
    }

    /// Append a closed-enumeration tag.
    pub fn put_enum(&mut self, tag: i32) {
        self.buf.put_i32(tag);
    }

    /// Finish encoding and return the frame.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Binary decoder over one received IQ packet.
pub struct Decoder {
    buf: Bytes,
}

impl Decoder {
    /// Wrap a received frame. The envelope has not been read yet.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, required: usize) -> WireResult<()> {
        if self.buf.remaining() < required {
            return Err(WireError::BufferTooSmall {
                required,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read the packet envelope.
    pub fn envelope(&mut self) -> WireResult<Envelope> {
        self.need(16 + 4 + 8)?;
        let mut id = [0u8; 16];
        self.buf.copy_to_slice(&mut id);
        let schema_id = Uuid::from_bytes(id);
        let schema_version = self.buf.get_i32();
        let request_id = self.buf.get_i64();
        Ok(Envelope {
            schema_id,
            schema_version,
            request_id,
        })
    }

    /// Read a signed 32-bit integer.
    pub fn get_i32(&mut self) -> WireResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    /// Read a signed 64-bit integer.
    pub fn get_i64(&mut self) -> WireResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    /// Read a boolean byte.
    pub fn get_bool(&mut self) -> WireResult<bool> {
        self.need(1)?;
        Ok(self.buf.get_u8() != 0)
    }

    /// Read an IEEE-754 double.
    pub fn get_f64(&mut self) -> WireResult<f64> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    fn get_len(&mut self) -> WireResult<usize> {
        self.need(4)?;
        let len = self.buf.get_u32();
        if len > MAX_FIELD_LEN {
            return Err(WireError::InvalidLength { length: len as u64 });
        }
        Ok(len as usize)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> WireResult<String> {
        let len = self.get_len()?;
        self.need(len)?;
        let raw = self.buf.copy_to_bytes(len);
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    /// Read an optional string.
    pub fn get_opt_string(&mut self) -> WireResult<Option<String>> {
        if self.get_bool()? {
            Ok(Some(self.get_string()?))
        } else {
            Ok(None)
        }
    }

    /// Read a length-prefixed byte array.
    pub fn get_bytes(&mut self) -> WireResult<Bytes> {
        let len = self.get_len()?;
        self.need(len)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    /// Read an optional byte array.
    pub fn get_opt_bytes(&mut self) -> WireResult<Option<Bytes>> {
        if self.get_bool()? {
            Ok(Some(self.get_bytes()?))
        } else {
            Ok(None)
        }
    }

    /// Read a closed-enumeration tag. The caller maps it to a variant and
    /// must fail with [`WireError::InvalidEnumValue`] on an unknown tag.
    pub fn get_enum(&mut self) -> WireResult<i32> {
        self.get_i32()
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}
