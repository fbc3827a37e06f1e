//! Error types for IQ packet encoding and decoding.

use uuid::Uuid;

/// Result type for wire operations
pub type WireResult<T> = Result<T, WireError>;

/// Errors raised while encoding or decoding IQ packets.
///
/// Decoding is strict: a truncated buffer, an unknown schema id or an
/// unrecognized enum tag is a hard fault. There is no partial-message
/// recovery; the caller is expected to fail the enclosing dispatch loudly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Buffer too small for the requested read
    #[error("buffer too small: need {required} bytes, {available} available")]
    BufferTooSmall {
        /// Bytes needed to complete the read
        required: usize,
        /// Bytes actually remaining
        available: usize,
    },

    /// Schema id does not match any known message type
    #[error("unknown schema id {schema_id}")]
    UnknownSchema {
        /// The schema id found in the envelope
        schema_id: Uuid,
    },

    /// Schema version is newer than this implementation understands
    #[error("unsupported version {found} for schema {schema_id} (max {supported})")]
    UnsupportedVersion {
        /// The schema id found in the envelope
        schema_id: Uuid,
        /// The version found in the envelope
        found: i32,
        /// The highest version this implementation supports
        supported: i32,
    },

    /// An enum field carried a tag outside the closed set of variants
    #[error("invalid value {value} for enum {name}")]
    InvalidEnumValue {
        /// Name of the enumeration being decoded
        name: &'static str,
        /// The offending tag
        value: i32,
    },

    /// A string field was not valid UTF-8
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A length prefix exceeded the remaining buffer or a sane bound
    #[error("invalid length prefix {length}")]
    InvalidLength {
        /// The offending length value
        length: u64,
    },
}
