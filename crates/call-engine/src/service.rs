//! External collaborator interfaces.
//!
//! The engine drives signaling, media transport, call rooms and identity
//! resolution through these traits and never implements them itself. The
//! host wires in real implementations; tests wire in mocks.
//!
//! Signaling and call-room operations are correlated: the engine passes a
//! request id it allocated, the service submits the request, and the host
//! later feeds the outcome back through the orchestrator's `on_*` callbacks
//! carrying the same id.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{
    CallRoomId, CameraFacing, MemberId, Originator, PeerId, SessionId, TerminateReason,
};

/// Error codes reported by the external services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceErrorCode {
    /// The target of a pending operation no longer exists
    #[error("item not found")]
    ItemNotFound,
    /// The service is temporarily offline; retry is reconnect-driven
    #[error("service unavailable")]
    ServiceUnavailable,
    /// The request was refused by policy
    #[error("no permission")]
    NoPermission,
    /// A resource limit was hit (for example the call-room is full)
    #[error("limit reached")]
    LimitReached,
    /// The request was malformed
    #[error("bad request")]
    BadRequest,
    /// Anything unclassified inside the service
    #[error("internal service error")]
    InternalError,
}

/// Result type for service calls.
pub type ServiceResult<T> = Result<T, ServiceErrorCode>;

/// Capabilities of the local cameras, as reported by the media transport.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Bitmap of available cameras (bit N set = camera N exists)
    pub camera_bitmap: i32,
    /// Index of the currently active camera
    pub active_camera: i32,
    /// Minimum supported zoom scale
    pub min_zoom: f64,
    /// Maximum supported zoom scale
    pub max_zoom: f64,
}

/// Membership status reported in a call-room join response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// The joining device must create a new P2P session to this member
    NewMemberNeedSession,
    /// A P2P session to this member already exists
    HasSession,
    /// This entry is the joining device itself
    Local,
}

/// One member entry in a call-room join response or join notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRoomMember {
    /// Room-scoped member id
    pub member_id: MemberId,
    /// Routing identity of the member
    pub peer_id: PeerId,
    /// The member's current P2P session with us, when one exists
    pub session_id: Option<SessionId>,
    /// How the receiver should treat this member
    pub status: MemberStatus,
}

/// Payload of a successful call-room join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRoomJoinInfo {
    /// The joined room
    pub room_id: CallRoomId,
    /// Our member id in the room
    pub local_member_id: MemberId,
    /// Full current member list
    pub members: Vec<CallRoomMember>,
    /// Maximum members, local side included
    pub max_members: usize,
}

/// Identity resolved for an originator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// Display name
    pub name: String,
    /// Display description
    pub description: Option<String>,
    /// Avatar image bytes
    pub avatar: Option<Bytes>,
    /// Calls from this identity are answered without ringing
    pub auto_answer: bool,
    /// This identity may transfer calls between its devices
    pub transfer_allowed: bool,
}

/// Conversation-level signaling: start, accept and terminate call offers.
#[async_trait]
pub trait SignalingService: Send + Sync {
    /// Submit an outgoing call offer to a peer. The outcome arrives later
    /// through `on_start_call_response` with the same request id.
    async fn start_call(
        &self,
        request_id: i64,
        peer_id: PeerId,
        video: bool,
    ) -> ServiceResult<()>;

    /// Accept an incoming call offer on a session.
    async fn accept_call(
        &self,
        request_id: i64,
        session_id: SessionId,
        video: bool,
    ) -> ServiceResult<()>;

    /// Terminate the call on a session with a reason the peer will see.
    async fn terminate_call(
        &self,
        request_id: i64,
        session_id: SessionId,
        reason: TerminateReason,
    ) -> ServiceResult<()>;
}

/// The media transport: P2P sessions, local camera, sideband frames.
///
/// The engine never touches codecs, SDP or ICE. It drives this opaque
/// surface and consumes the transport state changes the host feeds back
/// through the orchestrator.
#[async_trait]
pub trait PeerConnectionService: Send + Sync {
    /// Create an outgoing P2P session towards a peer.
    async fn create_outgoing_session(
        &self,
        peer_id: PeerId,
        video: bool,
    ) -> ServiceResult<SessionId>;

    /// Accept an incoming P2P session.
    async fn accept_session(&self, session_id: SessionId, video: bool) -> ServiceResult<()>;

    /// Terminate a P2P session.
    async fn terminate_session(
        &self,
        session_id: SessionId,
        reason: TerminateReason,
    ) -> ServiceResult<()>;

    /// Send one sideband frame over the session's data channel.
    async fn send_frame(&self, session_id: SessionId, frame: Bytes) -> ServiceResult<()>;

    /// Enable or disable sending audio on a session.
    async fn set_audio_direction(&self, session_id: SessionId, send: bool) -> ServiceResult<()>;

    /// Enable or disable sending video on a session.
    async fn set_video_direction(&self, session_id: SessionId, send: bool) -> ServiceResult<()>;

    /// Switch the local camera facing.
    async fn switch_camera(&self, facing: CameraFacing) -> ServiceResult<()>;

    /// Select a specific local camera by index.
    async fn select_camera(&self, camera: i32) -> ServiceResult<()>;

    /// Apply a zoom scale to the local camera.
    async fn set_zoom(&self, scale: f64) -> ServiceResult<()>;

    /// Mute or unmute the local camera.
    async fn set_camera_mute(&self, muted: bool) -> ServiceResult<()>;

    /// Describe the local cameras.
    async fn local_camera_info(&self) -> ServiceResult<CameraInfo>;

    /// Attach the remote video track of a session to a rendering surface.
    async fn attach_renderer(&self, session_id: SessionId, track_id: &str) -> ServiceResult<()>;

    /// Detach and release whatever renderer a session holds.
    async fn release_renderer(&self, session_id: SessionId) -> ServiceResult<()>;
}

/// Server-side call-room coordination for meshed group calls.
#[async_trait]
pub trait CallRoomService: Send + Sync {
    /// Create a call room with an initial member table. The outcome arrives
    /// through `on_create_call_room` with the same request id.
    async fn create_call_room(
        &self,
        request_id: i64,
        members: Vec<(PeerId, Option<SessionId>)>,
        max_members: usize,
    ) -> ServiceResult<()>;

    /// Join an existing call room, declaring the P2P sessions we already
    /// hold. The member list arrives through `on_join_call_room`.
    async fn join_call_room(
        &self,
        request_id: i64,
        room_id: CallRoomId,
        known_sessions: Vec<(PeerId, SessionId)>,
    ) -> ServiceResult<()>;

    /// Invite a peer into a call room over an existing session.
    async fn invite_call_room(
        &self,
        request_id: i64,
        room_id: CallRoomId,
        peer_id: PeerId,
        session_id: SessionId,
    ) -> ServiceResult<()>;

    /// Leave a call room.
    async fn leave_call_room(&self, room_id: CallRoomId, member_id: MemberId)
        -> ServiceResult<()>;
}

/// Asynchronous originator-to-identity resolution.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a display identity for an originator.
    async fn resolve(&self, originator: &Originator) -> ServiceResult<ResolvedIdentity>;
}
