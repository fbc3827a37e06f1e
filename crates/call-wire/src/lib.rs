//! # meshcall-wire
//!
//! Binary IQ sideband protocol for the meshcall P2P calling stack.
//!
//! Once a P2P media session is established, the two ends exchange small
//! schema-tagged binary packets ("IQ packets") over the data channel:
//! participant identity, hold/resume, the device-transfer handshake, remote
//! camera control, the media streaming side-channel and the key-verification
//! handshake. This crate defines:
//!
//! - the shared envelope and field codec ([`codec`]),
//! - the message catalog and the [`IqMessage`](messages::IqMessage) sum type
//!   ([`messages`]),
//! - the peer version/capability string format ([`version`]).
//!
//! Wire compatibility matters here: schema ids, field order and the
//! version-string layout must not change, or existing peers stop
//! understanding us. Decoding is strict by the same token — an unknown
//! schema id or enum tag is a hard [`WireError`](error::WireError), never a
//! silent skip.
//!
//! ## Example
//!
//! ```rust
//! use meshcall_wire::messages::{IqMessage, HoldCallIq};
//!
//! let frame = IqMessage::HoldCall(HoldCallIq { request_id: 1 }).encode();
//! let decoded = IqMessage::decode(frame).unwrap();
//! assert!(matches!(decoded, IqMessage::HoldCall(_)));
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod version;

pub use codec::{Decoder, Encoder, Envelope};
pub use error::{WireError, WireResult};
pub use messages::IqMessage;
pub use version::{format_version_string, PeerVersion, ZoomMode};
