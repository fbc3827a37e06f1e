//! Domain events emitted by the call engine.
//!
//! State machines never call back into their callers. Everything a host
//! application needs to observe flows one way, over an event channel, and
//! is fanned out to registered [`CallEventHandler`]s by the orchestrator.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::participant::CallParticipant;
use crate::types::{
    CallId, CallStatus, ConnectionId, DescriptorId, Originator, TerminateReason, VideoGeometry,
};

/// Something observable happened to one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParticipantEventKind {
    /// The media path to this participant is established
    Connected,
    /// Name, description or avatar changed
    IdentityChanged,
    /// Microphone mute state changed
    AudioMuted(bool),
    /// Camera mute state changed
    CameraMuted(bool),
    /// Screen sharing started or stopped
    ScreenSharing(bool),
    /// The peer is ringing
    Ringing,
    /// The peer put this leg on hold
    PeerHold,
    /// The peer resumed this leg
    PeerResume,
    /// The peer's video track geometry changed
    VideoGeometry(VideoGeometry),
}

/// Streaming side-channel observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamingEventKind {
    /// A streaming session started (replacing any previous one)
    Started,
    /// The session paused
    Paused,
    /// The session resumed
    Resumed,
    /// The session stopped
    Stopped,
    /// Track description received
    Info {
        /// Track title, when the sender provided one
        title: Option<String>,
        /// Track duration in milliseconds
        duration_ms: i64,
    },
    /// The peer asked for data from a position
    DataRequested {
        /// Requested position in milliseconds
        position_ms: i64,
    },
}

/// Key-verification handshake observations, relayed without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyCheckEventKind {
    /// The peer started the word-check handshake
    Initiated {
        /// Handshake nonce
        nonce: Bytes,
    },
    /// The peer acknowledged a handshake we started
    Acknowledged {
        /// Handshake nonce
        nonce: Bytes,
    },
    /// The peer confirmed or rejected one word
    WordChecked {
        /// Index of the checked word
        word_index: i32,
        /// Whether the word matched
        accepted: bool,
    },
    /// The handshake finished
    Terminated {
        /// Whether verification succeeded
        success: bool,
    },
    /// Twincode URI exchanged during verification
    TwincodeUri {
        /// The exchanged URI
        uri: String,
    },
}

/// One event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallEvent {
    /// A new incoming call is ringing
    IncomingCall {
        /// The new call
        call_id: CallId,
        /// Its first connection
        connection_id: ConnectionId,
        /// Who is calling
        originator: Originator,
        /// Whether video was offered
        video: bool,
    },
    /// The aggregated call status changed
    CallStatusChanged {
        /// The call
        call_id: CallId,
        /// New aggregated status
        status: CallStatus,
    },
    /// A call terminated
    CallTerminated {
        /// The call
        call_id: CallId,
        /// Why it ended
        reason: TerminateReason,
        /// Whether this counts as a missed call
        missed: bool,
    },
    /// A participant joined the call
    ParticipantAdded {
        /// The call
        call_id: CallId,
        /// Snapshot of the participant
        participant: CallParticipant,
    },
    /// A participant left the call
    ParticipantRemoved {
        /// The call
        call_id: CallId,
        /// The removed participant's connection
        connection_id: ConnectionId,
        /// Why the leg ended
        reason: TerminateReason,
    },
    /// Something observable happened to a participant
    ParticipantEvent {
        /// The call
        call_id: CallId,
        /// The participant's connection
        connection_id: ConnectionId,
        /// What happened
        kind: ParticipantEventKind,
    },
    /// A peer asked for camera control and local policy requires confirmation
    CameraControlAsk {
        /// The call
        call_id: CallId,
        /// The requesting peer's connection
        connection_id: ConnectionId,
    },
    /// Camera control was granted to a peer
    CameraControlGranted {
        /// The call
        call_id: CallId,
        /// The controlling peer's connection
        connection_id: ConnectionId,
    },
    /// Camera control was revoked
    CameraControlRevoked {
        /// The call
        call_id: CallId,
        /// The formerly controlling peer's connection
        connection_id: ConnectionId,
    },
    /// Streaming side-channel observation
    Streaming {
        /// The call
        call_id: CallId,
        /// What happened
        kind: StreamingEventKind,
    },
    /// A descriptor was appended to the call's log
    DescriptorPushed {
        /// The call
        call_id: CallId,
        /// The new descriptor
        descriptor: Descriptor,
    },
    /// An existing descriptor changed in place
    DescriptorUpdated {
        /// The call
        call_id: CallId,
        /// The changed descriptor
        descriptor: Descriptor,
    },
    /// A descriptor was removed
    DescriptorDeleted {
        /// The call
        call_id: CallId,
        /// The removed descriptor
        descriptor_id: DescriptorId,
    },
    /// Key-verification handshake observation
    KeyCheck {
        /// The call
        call_id: CallId,
        /// The peer's connection
        connection_id: ConnectionId,
        /// What happened
        kind: KeyCheckEventKind,
    },
    /// A user-visible error scoped to one call (or to the engine)
    Error {
        /// The affected call, when one is involved
        call_id: Option<CallId>,
        /// Diagnostic description
        message: String,
    },
}

/// Handler for engine events, registered with the orchestrator.
#[async_trait]
pub trait CallEventHandler: Send + Sync {
    /// Called for every emitted event, in emission order.
    async fn on_event(&self, event: CallEvent);
}
