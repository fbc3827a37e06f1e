//! One P2P call leg.
//!
//! A `CallConnection` tracks the transport session, the call-visible status
//! progression, the negotiated capabilities and the sideband protocol state
//! for a single peer. It is owned by its call and mutated only under the
//! call's lock; it never performs I/O itself. Instead, message dispatch and
//! state transitions return [`ConnectionSignal`]s that the call layer turns
//! into service calls and events.
//!
//! Termination is final. Every mutating method on a terminated connection
//! is a silent no-op, because termination can race in-flight protocol
//! messages.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use meshcall_wire::messages::{
    CameraControlIq, CameraError, CameraMode, CameraResponseIq, IqMessage, OnPrepareTransferIq,
    StreamingOp,
};

use crate::capabilities::{PeerCapabilities, ZoomPolicy};
use crate::events::KeyCheckEventKind;
use crate::ops::{ConnectionOperation, OperationSet};
use crate::participant::CallParticipant;
use crate::service::CameraInfo;
use crate::timer::CallTimer;
use crate::types::{
    CallDirection, CallId, CallStatus, ConnectionId, ConnectionState, MemberId, PeerId,
    SessionId, TerminateReason,
};

/// What a connection asks its call to do after a state change or an inbound
/// message. The connection computes, the call layer acts.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionSignal {
    /// The call-visible status changed; re-aggregate and notify
    StatusChanged,
    /// The transport reached CONNECTED for the first time
    FirstConnected,
    /// The peer put this leg on hold
    PeerHold,
    /// The peer resumed this leg
    PeerResume,
    /// Write this frame to the data channel
    SendFrame(Bytes),
    /// Local policy requires user confirmation before granting camera control
    CameraAsk,
    /// Camera control was granted to the peer
    CameraGranted,
    /// Camera control was revoked
    CameraRevoked,
    /// Apply this camera action locally, then ack with the same request id
    CameraAction {
        /// Requested operation
        mode: CameraMode,
        /// Camera index, for Select
        camera: i32,
        /// Zoom scale, for Zoom
        scale: f64,
        /// Request id to carry in the ack
        request_id: i64,
    },
    /// The peer forewarned us of a transfer; already acked
    PrepareTransferReceived,
    /// The peer acked our PrepareTransfer
    PrepareAck,
    /// The transfer target says the outgoing device may disconnect
    TransferDone,
    /// This connection's peer is being replaced by the named member
    ParticipantTransfer(MemberId),
    /// The participant's identity changed
    ParticipantUpdated,
    /// Streaming control received
    StreamingControl {
        /// Requested operation
        op: StreamingOp,
        /// Position in milliseconds
        position_ms: i64,
    },
    /// Streaming data chunk received
    StreamingData {
        /// Chunk sequence number
        sequence: i64,
        /// Opaque media bytes
        payload: Bytes,
    },
    /// Streaming track description received
    StreamingInfo {
        /// Track title
        title: Option<String>,
        /// Track duration in milliseconds
        duration_ms: i64,
        /// Track MIME type
        mime_type: Option<String>,
    },
    /// Streaming pull request received
    StreamingRequest {
        /// Requested position in milliseconds
        position_ms: i64,
    },
    /// Key-verification observation, relayed without interpretation
    KeyCheck(KeyCheckEventKind),
}

/// One P2P session and its protocol state.
pub struct CallConnection {
    /// Engine-local connection id
    pub id: ConnectionId,
    /// The owning call (reassigned on merge)
    pub call_id: CallId,
    /// Direction of this leg
    pub direction: CallDirection,
    /// Whether this leg carries video
    pub video: bool,
    /// Transport session, once assigned
    pub session_id: Option<SessionId>,
    /// Peer routing identity, once known
    pub peer_id: Option<PeerId>,
    /// Call-room member id of the peer, once known
    pub member_id: Option<MemberId>,
    /// Call-visible status
    status: CallStatus,
    /// Raw transport state, as last reported
    pub state: ConnectionState,
    /// Negotiated peer capabilities
    pub capabilities: PeerCapabilities,
    /// The main participant rendered through this connection
    pub participant: CallParticipant,
    /// Idempotency guards for this connection's coordination steps
    pub ops: OperationSet<ConnectionOperation>,
    /// Captured exactly once, on the first transport CONNECTED
    pub connected_at: Option<DateTime<Utc>>,
    /// Member this connection is being replaced by, when a transfer names one
    pub transfer_to_member: Option<MemberId>,
    /// Peer joined an existing room rather than being freshly invited
    pub invited: bool,
    /// Why this leg ended, set once on termination
    pub terminate_reason: Option<TerminateReason>,
    /// One pending timer, cancelled and replaced on rearm
    pub timer: CallTimer,
    local_hold: bool,
    /// Status to restore when local hold is released before the leg connects
    resume_status: Option<CallStatus>,
    peer_hold: bool,
    camera_granted_to_peer: bool,
    camera_ask_pending: bool,
    camera_granted_by_peer: bool,
}

impl CallConnection {
    fn new(call_id: CallId, direction: CallDirection, video: bool) -> Self {
        let id = ConnectionId::new();
        let status = match (direction, video) {
            (CallDirection::Outgoing, false) => CallStatus::OutgoingCall,
            (CallDirection::Outgoing, true) => CallStatus::OutgoingVideoCall,
            (CallDirection::Incoming, false) => CallStatus::IncomingCall,
            (CallDirection::Incoming, true) => CallStatus::IncomingVideoCall,
        };
        Self {
            id,
            call_id,
            direction,
            video,
            session_id: None,
            peer_id: None,
            member_id: None,
            status,
            state: ConnectionState::Init,
            capabilities: PeerCapabilities::unknown(),
            participant: CallParticipant::new(id),
            ops: OperationSet::new(),
            connected_at: None,
            transfer_to_member: None,
            invited: false,
            terminate_reason: None,
            timer: CallTimer::new(),
            local_hold: false,
            resume_status: None,
            peer_hold: false,
            camera_granted_to_peer: false,
            camera_ask_pending: false,
            camera_granted_by_peer: false,
        }
    }

    /// New outgoing leg towards a peer; the session is assigned later.
    pub fn new_outgoing(call_id: CallId, peer_id: PeerId, video: bool) -> Self {
        let mut conn = Self::new(call_id, CallDirection::Outgoing, video);
        conn.peer_id = Some(peer_id);
        conn.participant.peer_id = Some(peer_id);
        conn
    }

    /// New incoming leg, born with its transport session.
    pub fn new_incoming(
        call_id: CallId,
        session_id: SessionId,
        peer_id: PeerId,
        video: bool,
    ) -> Self {
        let mut conn = Self::new(call_id, CallDirection::Incoming, video);
        conn.session_id = Some(session_id);
        conn.peer_id = Some(peer_id);
        conn.participant.peer_id = Some(peer_id);
        conn
    }

    /// Current call-visible status.
    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// The status an established leg shows when nothing holds it.
    fn active_status(&self) -> CallStatus {
        if self.video {
            CallStatus::InVideoCall
        } else {
            CallStatus::InCall
        }
    }

    fn accepted_status(&self) -> CallStatus {
        match (self.direction, self.video) {
            (CallDirection::Incoming, false) => CallStatus::AcceptedIncomingCall,
            (CallDirection::Incoming, true) => CallStatus::AcceptedIncomingVideoCall,
            (CallDirection::Outgoing, false) => CallStatus::AcceptedOutgoingCall,
            (CallDirection::Outgoing, true) => CallStatus::AcceptedOutgoingVideoCall,
        }
    }

    fn set_status(&mut self, status: CallStatus) -> bool {
        if self.status == status {
            return false;
        }
        debug!(
            connection_id = %self.id,
            from = ?self.status,
            to = ?status,
            "connection status change"
        );
        self.status = status;
        true
    }

    /// Assign the transport session, once created.
    pub fn set_session(&mut self, session_id: SessionId) {
        if self.status.is_terminated() {
            return;
        }
        self.session_id = Some(session_id);
    }

    /// Mark the leg as ringing.
    pub fn set_ringing(&mut self) -> bool {
        if self.status.is_terminated() {
            return false;
        }
        let ringing = match self.status {
            CallStatus::OutgoingCall => CallStatus::OutgoingBell,
            CallStatus::OutgoingVideoCall => CallStatus::OutgoingVideoBell,
            CallStatus::IncomingCall => CallStatus::IncomingBell,
            CallStatus::IncomingVideoCall => CallStatus::IncomingVideoBell,
            _ => return false,
        };
        self.set_status(ringing)
    }

    /// The local user accepted this incoming leg, or the peer accepted our
    /// outgoing one.
    pub fn set_accepted(&mut self) -> bool {
        if self.status.is_terminated() || !self.status.is_ringing() {
            return false;
        }
        self.set_status(self.accepted_status())
    }

    /// Consume a transport state report.
    pub fn on_transport_state(&mut self, state: ConnectionState) -> Vec<ConnectionSignal> {
        if self.status.is_terminated() {
            return Vec::new();
        }
        self.state = state;
        let mut signals = Vec::new();
        if state == ConnectionState::Connected {
            if self.connected_at.is_none() {
                // Captured exactly once; CONNECTED re-deliveries keep it.
                self.connected_at = Some(Utc::now());
                self.timer.cancel();
                // A hold placed before the media path came up still wins.
                if !self.local_hold
                    && !self.peer_hold
                    && self.set_status(self.active_status())
                {
                    signals.push(ConnectionSignal::StatusChanged);
                }
                signals.push(ConnectionSignal::FirstConnected);
            } else if !self.local_hold
                && !self.peer_hold
                && self.set_status(self.active_status())
            {
                signals.push(ConnectionSignal::StatusChanged);
            }
        }
        signals
    }

    /// Put this leg on local hold or release it.
    pub fn set_local_hold(&mut self, hold: bool) -> bool {
        if self.status.is_terminated() || self.local_hold == hold {
            return false;
        }
        self.local_hold = hold;
        if hold {
            self.resume_status = Some(self.status);
            return self.set_status(CallStatus::OnHold);
        }
        let restored = self.resume_status.take();
        if self.peer_hold {
            self.set_status(CallStatus::PeerOnHold)
        } else if self.state == ConnectionState::Connected {
            self.set_status(self.active_status())
        } else {
            // A leg held before it was answered resumes where it left off.
            let status = restored.unwrap_or_else(|| self.accepted_status());
            self.set_status(status)
        }
    }

    /// Whether the leg is on local hold.
    pub fn is_local_hold(&self) -> bool {
        self.local_hold
    }

    /// Apply the peer's capability advertisement.
    pub fn apply_version_string(&mut self, value: &str) {
        if self.status.is_terminated() {
            return;
        }
        self.capabilities.apply_version_string(value);
        debug!(connection_id = %self.id, capabilities = ?self.capabilities, "peer advertised");
    }

    /// Grant camera control after a local user confirmation (ASK policy).
    /// Returns the response frame to send, when a request was pending.
    pub fn grant_camera(&mut self, local_camera: &CameraInfo) -> Option<Bytes> {
        if self.status.is_terminated() || !self.camera_ask_pending {
            return None;
        }
        self.camera_ask_pending = false;
        self.camera_granted_to_peer = true;
        Some(camera_response(0, CameraError::Success, local_camera))
    }

    /// Whether the peer currently controls the local camera.
    pub fn camera_granted_to_peer(&self) -> bool {
        self.camera_granted_to_peer
    }

    /// Whether we currently control the peer's camera.
    pub fn camera_granted_by_peer(&self) -> bool {
        self.camera_granted_by_peer
    }

    /// Terminate this leg. Returns false when already terminated.
    pub fn terminate(&mut self, reason: TerminateReason) -> bool {
        if self.status.is_terminated() {
            return false;
        }
        debug!(connection_id = %self.id, ?reason, "connection terminated");
        self.timer.cancel();
        self.terminate_reason = Some(reason);
        self.camera_granted_to_peer = false;
        self.camera_granted_by_peer = false;
        self.camera_ask_pending = false;
        self.set_status(CallStatus::Terminated);
        true
    }

    /// Dispatch one decoded sideband message.
    pub fn handle_message(
        &mut self,
        message: IqMessage,
        zoom_policy: ZoomPolicy,
        local_camera: &CameraInfo,
    ) -> Vec<ConnectionSignal> {
        if self.status.is_terminated() {
            // Termination races in-flight messages; drop them silently.
            return Vec::new();
        }
        match message {
            IqMessage::HoldCall(_) => {
                if self.peer_hold {
                    return Vec::new();
                }
                self.peer_hold = true;
                let mut signals = vec![ConnectionSignal::PeerHold];
                if !self.local_hold && self.set_status(CallStatus::PeerOnHold) {
                    signals.push(ConnectionSignal::StatusChanged);
                }
                signals
            }
            IqMessage::ResumeCall(_) => {
                if !self.peer_hold {
                    return Vec::new();
                }
                self.peer_hold = false;
                let mut signals = vec![ConnectionSignal::PeerResume];
                if !self.local_hold && self.set_status(self.active_status()) {
                    signals.push(ConnectionSignal::StatusChanged);
                }
                signals
            }
            IqMessage::ParticipantInfo(info) => {
                if self.member_id.is_none() {
                    self.member_id = Some(MemberId(info.member_id.clone()));
                }
                if self.participant.apply_info(&info) {
                    vec![ConnectionSignal::ParticipantUpdated]
                } else {
                    Vec::new()
                }
            }
            IqMessage::ParticipantTransfer(transfer) => {
                let member = MemberId(transfer.member_id);
                self.transfer_to_member = Some(member.clone());
                vec![ConnectionSignal::ParticipantTransfer(member)]
            }
            IqMessage::PrepareTransfer(iq) => {
                let ack = OnPrepareTransferIq {
                    request_id: iq.request_id,
                };
                vec![
                    ConnectionSignal::SendFrame(ack.encode()),
                    ConnectionSignal::PrepareTransferReceived,
                ]
            }
            IqMessage::OnPrepareTransfer(_) => vec![ConnectionSignal::PrepareAck],
            IqMessage::TransferDone(_) => vec![ConnectionSignal::TransferDone],
            IqMessage::CameraControl(control) => {
                self.handle_camera_control(control, zoom_policy, local_camera)
            }
            IqMessage::CameraResponse(response) => {
                self.participant.camera_bitmap = response.camera_bitmap;
                self.participant.active_camera = response.active_camera;
                if response.error == CameraError::Success && !self.camera_granted_by_peer {
                    self.camera_granted_by_peer = true;
                    return vec![ConnectionSignal::ParticipantUpdated];
                }
                Vec::new()
            }
            IqMessage::StreamingControl(control) => vec![ConnectionSignal::StreamingControl {
                op: control.op,
                position_ms: control.position_ms,
            }],
            IqMessage::StreamingData(data) => vec![ConnectionSignal::StreamingData {
                sequence: data.sequence,
                payload: data.payload,
            }],
            IqMessage::StreamingInfo(info) => vec![ConnectionSignal::StreamingInfo {
                title: info.title,
                duration_ms: info.duration_ms,
                mime_type: info.mime_type,
            }],
            IqMessage::StreamingRequest(request) => vec![ConnectionSignal::StreamingRequest {
                position_ms: request.position_ms,
            }],
            IqMessage::KeyCheckInitiate(iq) => {
                vec![ConnectionSignal::KeyCheck(KeyCheckEventKind::Initiated {
                    nonce: iq.nonce,
                })]
            }
            IqMessage::KeyCheckOnInitiate(iq) => {
                vec![ConnectionSignal::KeyCheck(KeyCheckEventKind::Acknowledged {
                    nonce: iq.nonce,
                })]
            }
            IqMessage::KeyCheckWordCheck(iq) => {
                vec![ConnectionSignal::KeyCheck(KeyCheckEventKind::WordChecked {
                    word_index: iq.word_index,
                    accepted: iq.accepted,
                })]
            }
            IqMessage::KeyCheckTerminate(iq) => {
                vec![ConnectionSignal::KeyCheck(KeyCheckEventKind::Terminated {
                    success: iq.success,
                })]
            }
            IqMessage::TwincodeUri(iq) => {
                vec![ConnectionSignal::KeyCheck(KeyCheckEventKind::TwincodeUri {
                    uri: iq.uri,
                })]
            }
        }
    }

    fn handle_camera_control(
        &mut self,
        control: CameraControlIq,
        zoom_policy: ZoomPolicy,
        local_camera: &CameraInfo,
    ) -> Vec<ConnectionSignal> {
        let request_id = control.request_id;
        match control.mode {
            // Stop always revokes and acks success, whichever side holds
            // the grant.
            CameraMode::Stop => {
                let was_granted = self.camera_granted_to_peer || self.camera_granted_by_peer;
                self.camera_granted_to_peer = false;
                self.camera_granted_by_peer = false;
                self.camera_ask_pending = false;
                let mut signals = vec![ConnectionSignal::SendFrame(camera_response(
                    request_id,
                    CameraError::Success,
                    local_camera,
                ))];
                if was_granted {
                    signals.push(ConnectionSignal::CameraRevoked);
                }
                signals
            }
            CameraMode::Check => match zoom_policy {
                ZoomPolicy::Never => vec![ConnectionSignal::SendFrame(camera_response(
                    request_id,
                    CameraError::NoPermission,
                    local_camera,
                ))],
                ZoomPolicy::Ask => {
                    if self.camera_granted_to_peer {
                        return vec![ConnectionSignal::SendFrame(camera_response(
                            request_id,
                            CameraError::Success,
                            local_camera,
                        ))];
                    }
                    // No response yet; the grant is deferred to the user.
                    self.camera_ask_pending = true;
                    vec![ConnectionSignal::CameraAsk]
                }
                ZoomPolicy::Allow => {
                    self.camera_granted_to_peer = true;
                    vec![
                        ConnectionSignal::SendFrame(camera_response(
                            request_id,
                            CameraError::Success,
                            local_camera,
                        )),
                        ConnectionSignal::CameraGranted,
                    ]
                }
            },
            CameraMode::On | CameraMode::Off | CameraMode::Select | CameraMode::Zoom => {
                if !self.camera_granted_to_peer {
                    return vec![ConnectionSignal::SendFrame(camera_response(
                        request_id,
                        CameraError::NoPermission,
                        local_camera,
                    ))];
                }
                vec![ConnectionSignal::CameraAction {
                    mode: control.mode,
                    camera: control.camera,
                    scale: control.scale,
                    request_id,
                }]
            }
        }
    }
}

/// Build a camera response frame carrying the local camera description.
pub fn camera_response(request_id: i64, error: CameraError, info: &CameraInfo) -> Bytes {
    CameraResponseIq {
        request_id,
        error,
        camera_bitmap: info.camera_bitmap,
        active_camera: info.active_camera,
        min_zoom: info.min_zoom,
        max_zoom: info.max_zoom,
    }
    .encode()
}
