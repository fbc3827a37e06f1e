//! Core identifiers and enumerations for the call engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id! {
    /// Identifies one call (the aggregate, possibly with multiple peers)
    CallId
}
uuid_id! {
    /// Identifies one call leg (one `CallConnection`) within the engine
    ConnectionId
}
uuid_id! {
    /// Transport-level P2P session id, assigned by the peer-connection service
    SessionId
}
uuid_id! {
    /// Opaque per-identity routing id (twincode) used to reach a peer
    PeerId
}
uuid_id! {
    /// Group identity for group-originated calls
    GroupId
}
uuid_id! {
    /// Server-side call-room id for meshed group calls
    CallRoomId
}
uuid_id! {
    /// Identifies one descriptor in a call's descriptor log
    DescriptorId
}

/// Call-room member id, assigned by the call-room service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        MemberId(value.to_string())
    }
}

/// The call counterpart a call is placed to or from: a contact, a group,
/// a group member, or a call-receiver (click-to-call) link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Originator {
    /// Peer routing identity
    pub peer_id: PeerId,
    /// Group the call belongs to, when group-originated
    pub group_id: Option<GroupId>,
}

impl Originator {
    /// Originator for a plain 1:1 contact call.
    pub fn contact(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            group_id: None,
        }
    }

    /// Originator for a group call.
    pub fn group(peer_id: PeerId, group_id: GroupId) -> Self {
        Self {
            peer_id,
            group_id: Some(group_id),
        }
    }
}

/// Direction of a call or connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// Placed by the local user
    Outgoing,
    /// Received from a peer
    Incoming,
}

/// Raw transport connection state, reported by the peer-connection service.
/// The engine only consumes this state; it never defines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Session created, negotiation not started
    Init,
    /// ICE/connectivity checks in progress
    Checking,
    /// Media path established
    Connected,
    /// Temporarily lost, may recover
    Disconnected,
    /// Negotiation or connectivity failed
    Failed,
    /// Session closed
    Closed,
}

/// Call-visible status of a connection (richer than the transport state),
/// also used as the aggregated status of a whole call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    /// Outgoing audio call, not yet ringing at the peer
    OutgoingCall,
    /// Outgoing video call, not yet ringing at the peer
    OutgoingVideoCall,
    /// Outgoing audio call, ringing at the peer
    OutgoingBell,
    /// Outgoing video call, ringing at the peer
    OutgoingVideoBell,
    /// Incoming audio call, not yet ringing locally
    IncomingCall,
    /// Incoming video call, not yet ringing locally
    IncomingVideoCall,
    /// Incoming audio call, ringing locally
    IncomingBell,
    /// Incoming video call, ringing locally
    IncomingVideoBell,
    /// Incoming audio call accepted, waiting for the media path
    AcceptedIncomingCall,
    /// Incoming video call accepted, waiting for the media path
    AcceptedIncomingVideoCall,
    /// Outgoing audio call accepted by the peer, waiting for the media path
    AcceptedOutgoingCall,
    /// Outgoing video call accepted by the peer, waiting for the media path
    AcceptedOutgoingVideoCall,
    /// Audio call established
    InCall,
    /// Video call established
    InVideoCall,
    /// The peer put this leg on hold
    PeerOnHold,
    /// The local user put the call on hold
    OnHold,
    /// Terminal state; nothing leaves it
    Terminated,
}

impl CallStatus {
    /// Media path established (audio or video).
    pub fn is_active(self) -> bool {
        matches!(self, CallStatus::InCall | CallStatus::InVideoCall)
    }

    /// Accepted, waiting for the media path.
    pub fn is_accepted(self) -> bool {
        matches!(
            self,
            CallStatus::AcceptedIncomingCall
                | CallStatus::AcceptedIncomingVideoCall
                | CallStatus::AcceptedOutgoingCall
                | CallStatus::AcceptedOutgoingVideoCall
        )
    }

    /// Still ringing or dialing, in either direction.
    pub fn is_ringing(self) -> bool {
        matches!(
            self,
            CallStatus::OutgoingCall
                | CallStatus::OutgoingVideoCall
                | CallStatus::OutgoingBell
                | CallStatus::OutgoingVideoBell
                | CallStatus::IncomingCall
                | CallStatus::IncomingVideoCall
                | CallStatus::IncomingBell
                | CallStatus::IncomingVideoBell
        )
    }

    /// Terminal.
    pub fn is_terminated(self) -> bool {
        self == CallStatus::Terminated
    }
}

/// Why a connection or call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminateReason {
    /// Normal hangup
    Success,
    /// Peer was busy
    Busy,
    /// Caller cancelled before the call was accepted
    Cancel,
    /// Callee declined
    Decline,
    /// Target vanished (item-not-found on a pending operation)
    Gone,
    /// Media path could not be established or was lost
    ConnectivityError,
    /// Ring/connect timer expired
    Timeout,
    /// Expected silent handover at the end of a device transfer
    TransferDone,
    /// Call emptied because its connections were merged into another call
    Merge,
    /// Schedule window does not allow the call
    Schedule,
    /// Anything unclassified
    Unknown,
}

impl TerminateReason {
    /// Whether a never-connected incoming call ending with this reason
    /// counts as a missed call. Transfer handovers and merges are expected
    /// teardowns, not user-visible departures.
    pub fn counts_as_missed(self) -> bool {
        !matches!(self, TerminateReason::TransferDone | TerminateReason::Merge)
    }

    /// Whether participant-removed callbacks are suppressed for this
    /// reason (silent handover rather than a departure).
    pub fn suppresses_removal(self) -> bool {
        self == TerminateReason::TransferDone
    }
}

/// Which camera the local device is sending from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraFacing {
    /// Front camera (the default for calls)
    #[default]
    Front,
    /// Back camera
    Back,
}

/// Direction of an in-progress device transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferDirection {
    /// No transfer in progress
    #[default]
    None,
    /// Handing the call to another device
    ToDevice,
    /// Handing the call to a browser endpoint
    ToBrowser,
}

/// Geometry of a remote video track as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoGeometry {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Rotation in degrees (0, 90, 180, 270)
    pub rotation: u16,
}
