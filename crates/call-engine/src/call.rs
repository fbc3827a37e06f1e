//! The call aggregate.
//!
//! A `CallState` owns its ordered connection set (the first connection is
//! the initial leg), the call-room membership, the transfer handshake, the
//! streaming session and the descriptor log. It is one lock domain: the
//! orchestrator wraps each call in a `tokio::sync::Mutex` and every
//! mutation happens under it. Calls talk to the outside world only through
//! the shared [`EngineContext`], never back into the orchestrator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use meshcall_wire::messages::{
    CameraError, CameraMode, HoldCallIq, IqMessage, ParticipantInfoIq, PrepareTransferIq,
    ResumeCallIq, StreamingControlIq, StreamingOp,
};

use crate::connection::{camera_response, CallConnection, ConnectionSignal};
use crate::context::{EngineCommand, EngineContext, PendingRequest};
use crate::descriptor::{DescriptorLog, GeolocationChange};
use crate::error::{EngineError, EngineResult};
use crate::events::{CallEvent, ParticipantEventKind, StreamingEventKind};
use crate::ops::{CallOperation, ConnectionOperation, OperationSet};
use crate::service::{CallRoomMember, CameraInfo, MemberStatus, ServiceErrorCode};
use crate::streaming::StreamingSession;
use crate::types::{
    CallDirection, CallId, CallRoomId, CallStatus, CameraFacing, ConnectionId, ConnectionState,
    MemberId, Originator, PeerId, SessionId, TerminateReason, TransferDirection,
};

/// Call-room membership of a group call.
#[derive(Debug, Clone)]
pub struct CallRoom {
    /// Server-side room id
    pub id: CallRoomId,
    /// Our own member id in the room, once joined
    pub member_id: Option<MemberId>,
    /// Maximum members, local side included
    pub max_members: usize,
}

/// Transfer handshake bookkeeping.
#[derive(Debug, Default)]
pub struct TransferState {
    /// Where the call is going, `None` while no transfer is in progress
    pub direction: TransferDirection,
    /// The connection being transferred away from
    pub from_connection: Option<ConnectionId>,
    /// The member replacing it
    pub to_member: Option<MemberId>,
    /// Connections whose PrepareTransfer ack is still outstanding
    pub pending_acks: HashSet<ConnectionId>,
    /// A connected-transition deferred until every ack lands
    pub deferred_connection: Option<ConnectionId>,
}

/// One call, possibly with multiple peers.
pub struct CallState {
    /// Call id
    pub id: CallId,
    /// Who the call is placed to or from
    pub originator: Originator,
    /// Direction of the initial leg
    pub direction: CallDirection,
    /// Whether the call carries video
    pub video: bool,
    /// Local on-hold flag; overrides every aggregated status
    pub on_hold: bool,
    /// Local camera facing
    pub camera_facing: CameraFacing,
    /// Ordered connection set; the first entry is the initial leg
    pub connections: Vec<CallConnection>,
    /// Idempotency guards for call-level coordination steps
    pub ops: OperationSet<CallOperation>,
    /// Call-room membership, for group calls
    pub room: Option<CallRoom>,
    /// Transfer handshake state
    pub transfer: TransferState,
    /// At most one streaming session
    pub streaming: Option<StreamingSession>,
    /// Append-only descriptor log
    pub descriptors: DescriptorLog,
    /// Local camera description, fetched once when the call starts
    pub local_camera: CameraInfo,
    /// Why the call ended, set once
    pub terminate_reason: Option<TerminateReason>,
    /// Reason of the most recent leg removal, used when the last leg
    /// leaving decides the call's own terminate reason
    pub last_removal_reason: Option<TerminateReason>,
    /// Requests that failed with an offline error, re-issued on reconnect
    pub pending_retries: Vec<PendingRequest>,
    lazy_join: Option<CallRoomId>,
    last_status: Option<CallStatus>,
    ever_connected: bool,
}

impl CallState {
    fn new(originator: Originator, direction: CallDirection, video: bool) -> Self {
        Self {
            id: CallId::new(),
            originator,
            direction,
            video,
            on_hold: false,
            camera_facing: CameraFacing::Front,
            connections: Vec::new(),
            ops: OperationSet::new(),
            room: None,
            transfer: TransferState::default(),
            streaming: None,
            descriptors: DescriptorLog::new(),
            local_camera: CameraInfo::default(),
            terminate_reason: None,
            last_removal_reason: None,
            pending_retries: Vec::new(),
            lazy_join: None,
            last_status: None,
            ever_connected: false,
        }
    }

    /// New outgoing call with its initial leg.
    pub fn new_outgoing(originator: Originator, video: bool) -> Self {
        let mut call = Self::new(originator.clone(), CallDirection::Outgoing, video);
        let connection = CallConnection::new_outgoing(call.id, originator.peer_id, video);
        call.connections.push(connection);
        call
    }

    /// New incoming call born from an incoming P2P offer.
    pub fn new_incoming(
        originator: Originator,
        session_id: SessionId,
        video: bool,
    ) -> Self {
        let mut call = Self::new(originator.clone(), CallDirection::Incoming, video);
        let connection =
            CallConnection::new_incoming(call.id, session_id, originator.peer_id, video);
        call.connections.push(connection);
        call
    }

    /// Aggregated call status, recomputed from the connection set.
    pub fn status(&self) -> CallStatus {
        if self.on_hold {
            return CallStatus::OnHold;
        }
        if self.connections.is_empty() {
            return CallStatus::Terminated;
        }
        if let Some(active) = self.connections.iter().find(|c| c.status().is_active()) {
            return active.status();
        }
        if let Some(accepted) = self.connections.iter().find(|c| c.status().is_accepted()) {
            return accepted.status();
        }
        if self
            .connections
            .iter()
            .all(|c| c.status() == CallStatus::PeerOnHold)
        {
            return CallStatus::PeerOnHold;
        }
        self.connections[0].status()
    }

    /// Whether the call has no legs left.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Find a connection by id.
    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut CallConnection> {
        self.connections.iter_mut().find(|c| c.id == id)
    }

    /// Find a connection by transport session.
    pub fn connection_by_session_mut(
        &mut self,
        session_id: SessionId,
    ) -> Option<&mut CallConnection> {
        self.connections
            .iter_mut()
            .find(|c| c.session_id == Some(session_id))
    }

    /// Emit a status-changed event when the aggregated status moved.
    pub fn emit_status(&mut self, ctx: &EngineContext) {
        let status = self.status();
        if self.last_status != Some(status) {
            self.last_status = Some(status);
            ctx.emit(CallEvent::CallStatusChanged {
                call_id: self.id,
                status,
            });
        }
    }

    fn arm_connection_timer(
        ctx: &Arc<EngineContext>,
        connection: &mut CallConnection,
        call_id: CallId,
        delay: Duration,
    ) {
        let connection_id = connection.id;
        let ctx = Arc::clone(ctx);
        connection.timer.rearm(delay, move || {
            ctx.send_command(EngineCommand::ConnectionTimerExpired {
                call_id,
                connection_id,
            });
        });
    }

    /// Issue the initial start-call request for an outgoing call.
    pub async fn start(&mut self, ctx: &Arc<EngineContext>) -> EngineResult<()> {
        if !self.ops.check(CallOperation::StartCall) {
            return Ok(());
        }
        match ctx.peer_connections.local_camera_info().await {
            Ok(info) => self.local_camera = info,
            Err(code) => debug!(?code, "local camera info unavailable"),
        }
        let call_id = self.id;
        let peer_id = self.originator.peer_id;
        let video = self.video;
        let outgoing_ring = ctx.config.outgoing_ring_timeout;
        let connection = self
            .connections
            .first_mut()
            .ok_or_else(|| EngineError::invalid_state("outgoing call without a leg"))?;
        if connection
            .ops
            .check(ConnectionOperation::CreateOutgoingPeerConnection)
        {
            let session_id = ctx
                .peer_connections
                .create_outgoing_session(peer_id, video)
                .await?;
            connection.set_session(session_id);
            connection
                .ops
                .mark_done(ConnectionOperation::CreateOutgoingPeerConnection);
        }
        let connection_id = connection.id;
        Self::arm_connection_timer(ctx, connection, call_id, outgoing_ring);
        let pending = PendingRequest::StartCall {
            call_id,
            connection_id,
        };
        let request_id = ctx.register_request(pending);
        match ctx.signaling.start_call(request_id, peer_id, video).await {
            Ok(()) => {
                info!(%call_id, %peer_id, video, "outgoing call started");
                Ok(())
            }
            Err(ServiceErrorCode::ServiceUnavailable) => {
                // Offline: keep the state, reconnect drives the retry.
                ctx.take_request(request_id);
                self.pending_retries.push(pending);
                Ok(())
            }
            Err(code) => {
                ctx.take_request(request_id);
                Err(EngineError::Service { code })
            }
        }
    }

    /// Accept the incoming initial leg.
    pub async fn accept(&mut self, ctx: &Arc<EngineContext>) -> EngineResult<()> {
        if !self.ops.check(CallOperation::AcceptCall) {
            return Ok(());
        }
        match ctx.peer_connections.local_camera_info().await {
            Ok(info) => self.local_camera = info,
            Err(code) => debug!(?code, "local camera info unavailable"),
        }
        let call_id = self.id;
        let video = self.video;
        let connect_timeout = ctx.config.connect_timeout;
        let connection = self
            .connections
            .first_mut()
            .ok_or_else(|| EngineError::invalid_state("incoming call without a leg"))?;
        let session_id = connection
            .session_id
            .ok_or_else(|| EngineError::invalid_state("incoming leg without a session"))?;
        let connection_id = connection.id;
        connection.set_accepted();
        Self::arm_connection_timer(ctx, connection, call_id, connect_timeout);
        ctx.peer_connections.accept_session(session_id, video).await?;
        let request_id = ctx.register_request(PendingRequest::AcceptCall {
            call_id,
            connection_id,
        });
        ctx.signaling.accept_call(request_id, session_id, video).await?;
        // A lazily recorded room join runs once the call is accepted.
        if let Some(room_id) = self.lazy_join.take() {
            self.join_call_room(ctx, room_id, true).await?;
        }
        self.emit_status(ctx);
        Ok(())
    }

    /// The start-call request was acknowledged; the peer is ringing.
    pub fn on_call_ringing(&mut self, ctx: &EngineContext, connection_id: ConnectionId) {
        let call_id = self.id;
        let ringing = self
            .connection_mut(connection_id)
            .map(|c| c.set_ringing())
            .unwrap_or(false);
        if ringing {
            ctx.emit(CallEvent::ParticipantEvent {
                call_id,
                connection_id,
                kind: ParticipantEventKind::Ringing,
            });
            self.emit_status(ctx);
        }
    }

    /// Arm a leg's ring/connect timer. Whatever was armed is cancelled.
    pub fn arm_timer(
        &mut self,
        ctx: &Arc<EngineContext>,
        connection_id: ConnectionId,
        delay: Duration,
    ) {
        let call_id = self.id;
        if let Some(connection) = self.connection_mut(connection_id) {
            Self::arm_connection_timer(ctx, connection, call_id, delay);
        }
    }

    /// The peer accepted our outgoing offer.
    pub fn on_peer_accepted(&mut self, ctx: &EngineContext, connection_id: ConnectionId) {
        let accepted = self
            .connection_mut(connection_id)
            .map(|c| c.set_accepted())
            .unwrap_or(false);
        if accepted {
            self.emit_status(ctx);
        }
    }

    /// Consume a transport state report for one session.
    pub async fn on_connection_state(
        &mut self,
        ctx: &Arc<EngineContext>,
        connection_id: ConnectionId,
        state: ConnectionState,
    ) -> EngineResult<()> {
        let signals = match self.connection_mut(connection_id) {
            Some(connection) => connection.on_transport_state(state),
            None => return Ok(()),
        };
        self.process_signals(ctx, connection_id, signals).await
    }

    /// First CONNECTED handling: transfer deferral, participant events,
    /// transfer substitution and call-room invites.
    async fn handle_first_connected(
        &mut self,
        ctx: &Arc<EngineContext>,
        connection_id: ConnectionId,
    ) -> EngineResult<()> {
        self.ever_connected = true;
        // A transfer target must wait until every existing participant has
        // acked the prepare phase.
        if !self.transfer.pending_acks.is_empty() && self.is_transfer_target(connection_id) {
            debug!(call_id = %self.id, %connection_id, "connected transition deferred by transfer");
            self.transfer.deferred_connection = Some(connection_id);
            return Ok(());
        }
        ctx.emit(CallEvent::ParticipantEvent {
            call_id: self.id,
            connection_id,
            kind: ParticipantEventKind::Connected,
        });
        self.emit_status(ctx);
        if self.is_transfer_target(connection_id) {
            self.perform_transfer(ctx, connection_id);
        }
        self.announce_local_identity(ctx, connection_id).await;
        self.send_room_invites(ctx).await?;
        Ok(())
    }

    /// Announce the local display identity on a freshly connected leg.
    async fn announce_local_identity(&mut self, ctx: &Arc<EngineContext>, connection_id: ConnectionId) {
        let member_id = match &self.room {
            Some(room) => match &room.member_id {
                Some(member_id) => member_id.0.clone(),
                None => return,
            },
            None => return,
        };
        let identity = match ctx.identities.resolve(&self.originator).await {
            Ok(identity) => identity,
            Err(code) => {
                debug!(?code, "local identity unresolved, skipping announcement");
                return;
            }
        };
        let Some(connection) = self.connection_mut(connection_id) else {
            return;
        };
        let Some(session_id) = connection.session_id else {
            return;
        };
        let info = ParticipantInfoIq {
            request_id: ctx.next_request_id(),
            member_id,
            name: identity.name,
            description: identity.description,
            thumbnail: identity.avatar,
        };
        if let Err(code) = ctx.peer_connections.send_frame(session_id, info.encode()).await {
            debug!(?code, %session_id, "identity announcement not delivered");
        }
    }

    /// Send call-room invites to every not-yet-invited member, idempotently
    /// per connection.
    pub(crate) async fn send_room_invites(&mut self, ctx: &Arc<EngineContext>) -> EngineResult<()> {
        let Some(room) = self.room.clone() else {
            return Ok(());
        };
        let call_id = self.id;
        let mut invites = Vec::new();
        for connection in &mut self.connections {
            if connection.status().is_terminated() || connection.invited {
                continue;
            }
            let (Some(peer_id), Some(session_id)) = (connection.peer_id, connection.session_id)
            else {
                continue;
            };
            if connection.ops.check(ConnectionOperation::InviteCallRoom) {
                invites.push((connection.id, peer_id, session_id));
            }
        }
        for (connection_id, peer_id, session_id) in invites {
            let request_id = ctx.register_request(PendingRequest::InviteCallRoom {
                call_id,
                connection_id,
            });
            ctx.call_rooms
                .invite_call_room(request_id, room.id, peer_id, session_id)
                .await?;
            debug!(%call_id, %peer_id, "call room invite sent");
        }
        Ok(())
    }

    /// Create the call room, once, with the current member table.
    pub async fn create_call_room(&mut self, ctx: &Arc<EngineContext>) -> EngineResult<()> {
        if !self.ops.check(CallOperation::CreateCallRoom) {
            return Ok(());
        }
        let members: Vec<(PeerId, Option<SessionId>)> = self
            .connections
            .iter()
            .filter(|c| !c.status().is_terminated())
            .filter_map(|c| c.peer_id.map(|peer_id| (peer_id, c.session_id)))
            .collect();
        let request_id = ctx.register_request(PendingRequest::CreateCallRoom { call_id: self.id });
        ctx.call_rooms
            .create_call_room(request_id, members, ctx.config.max_room_members)
            .await?;
        Ok(())
    }

    /// The room was created.
    pub fn on_create_call_room(&mut self, room_id: CallRoomId, member_id: MemberId) {
        self.ops.mark_done(CallOperation::CreateCallRoom);
        self.room = Some(CallRoom {
            id: room_id,
            member_id: Some(member_id),
            max_members: 0,
        });
        info!(call_id = %self.id, %room_id, "call room created");
    }

    /// Join a call room, eagerly or lazily.
    ///
    /// A join triggered before the local user accepted the incoming call is
    /// recorded and executed on accept, so no P2P connection is established
    /// towards other members before acceptance.
    pub async fn join_call_room(
        &mut self,
        ctx: &Arc<EngineContext>,
        room_id: CallRoomId,
        eager: bool,
    ) -> EngineResult<()> {
        if !eager && self.direction == CallDirection::Incoming && self.status().is_ringing() {
            debug!(call_id = %self.id, %room_id, "room join recorded, waiting for accept");
            self.lazy_join = Some(room_id);
            return Ok(());
        }
        if !self.ops.check(CallOperation::JoinCallRoom) {
            return Ok(());
        }
        let known_sessions: Vec<(PeerId, SessionId)> = self
            .connections
            .iter()
            .filter(|c| !c.status().is_terminated())
            .filter_map(|c| match (c.peer_id, c.session_id) {
                (Some(peer_id), Some(session_id)) => Some((peer_id, session_id)),
                _ => None,
            })
            .collect();
        let request_id = ctx.register_request(PendingRequest::JoinCallRoom { call_id: self.id });
        ctx.call_rooms
            .join_call_room(request_id, room_id, known_sessions)
            .await?;
        Ok(())
    }

    /// Apply a call-room join response: create outbound legs for members
    /// needing a session, keep existing sessions, cancel redundant
    /// duplicates. Returns the connection ids created.
    pub async fn on_join_call_room(
        &mut self,
        ctx: &Arc<EngineContext>,
        room_id: CallRoomId,
        local_member_id: MemberId,
        members: Vec<CallRoomMember>,
        max_members: usize,
    ) -> EngineResult<Vec<ConnectionId>> {
        self.ops.mark_done(CallOperation::JoinCallRoom);
        self.room = Some(CallRoom {
            id: room_id,
            member_id: Some(local_member_id),
            max_members,
        });
        let call_id = self.id;
        let mut created = Vec::new();
        for member in members {
            match member.status {
                MemberStatus::Local => {}
                MemberStatus::HasSession => {
                    let Some(session_id) = member.session_id else {
                        continue;
                    };
                    // Keep the live session; cancel any redundant duplicate
                    // towards the same member.
                    let mut duplicates = Vec::new();
                    for connection in &mut self.connections {
                        if connection.peer_id == Some(member.peer_id)
                            && !connection.status().is_terminated()
                        {
                            if connection.session_id == Some(session_id) {
                                connection.member_id = Some(member.member_id.clone());
                                connection.invited = true;
                            } else if let Some(stale) = connection.session_id {
                                duplicates.push((connection.id, stale));
                            }
                        }
                    }
                    for (connection_id, stale_session) in duplicates {
                        debug!(%call_id, %stale_session, "cancelling redundant duplicate session");
                        self.remove_connection(ctx, connection_id, TerminateReason::Cancel)
                            .await;
                    }
                }
                MemberStatus::NewMemberNeedSession => {
                    let mut connection =
                        CallConnection::new_outgoing(call_id, member.peer_id, self.video);
                    connection.member_id = Some(member.member_id.clone());
                    // Members discovered through a join are already in the
                    // room; they are never re-invited.
                    connection.invited = true;
                    if connection
                        .ops
                        .check(ConnectionOperation::CreateOutgoingPeerConnection)
                    {
                        let session_id = ctx
                            .peer_connections
                            .create_outgoing_session(member.peer_id, self.video)
                            .await?;
                        connection.set_session(session_id);
                        connection
                            .ops
                            .mark_done(ConnectionOperation::CreateOutgoingPeerConnection);
                    }
                    ctx.emit(CallEvent::ParticipantAdded {
                        call_id,
                        participant: connection.participant.clone(),
                    });
                    created.push(connection.id);
                    self.connections.push(connection);
                }
            }
        }
        Ok(created)
    }

    /// A member joined the room; nothing to do until its session shows up,
    /// but record the membership when we already hold the leg.
    pub fn on_member_join(&mut self, member: &CallRoomMember) {
        if let Some(session_id) = member.session_id {
            if let Some(connection) = self.connection_by_session_mut(session_id) {
                connection.member_id = Some(member.member_id.clone());
                connection.invited = true;
            }
        }
    }

    fn is_transfer_target(&self, connection_id: ConnectionId) -> bool {
        let Some(to_member) = &self.transfer.to_member else {
            return false;
        };
        self.connections
            .iter()
            .any(|c| c.id == connection_id && c.member_id.as_ref() == Some(to_member))
    }

    /// Phase 1 of a device transfer: forewarn every existing participant
    /// except the transfer target, tracking outstanding acks.
    pub async fn prepare_transfer(
        &mut self,
        ctx: &Arc<EngineContext>,
        to_member: MemberId,
        direction: TransferDirection,
    ) -> EngineResult<()> {
        self.transfer.to_member = Some(to_member.clone());
        self.transfer.direction = direction;
        let mut recipients = Vec::new();
        for connection in &self.connections {
            if connection.status().is_terminated() {
                continue;
            }
            if connection.member_id.as_ref() == Some(&to_member) {
                continue;
            }
            if let Some(session_id) = connection.session_id {
                recipients.push((connection.id, session_id));
            }
        }
        for (connection_id, session_id) in recipients {
            let frame = PrepareTransferIq {
                request_id: ctx.next_request_id(),
            }
            .encode();
            ctx.peer_connections.send_frame(session_id, frame).await?;
            self.transfer.pending_acks.insert(connection_id);
        }
        debug!(
            call_id = %self.id,
            pending = self.transfer.pending_acks.len(),
            "transfer prepared"
        );
        Ok(())
    }

    /// One PrepareTransfer ack landed; replay the deferred connected
    /// transition once the set empties.
    async fn on_prepare_ack(
        &mut self,
        ctx: &Arc<EngineContext>,
        connection_id: ConnectionId,
    ) -> EngineResult<()> {
        self.transfer.pending_acks.remove(&connection_id);
        if self.transfer.pending_acks.is_empty() {
            if let Some(deferred) = self.transfer.deferred_connection.take() {
                debug!(call_id = %self.id, %deferred, "replaying deferred connected transition");
                self.handle_first_connected(ctx, deferred).await?;
            }
        }
        Ok(())
    }

    /// Substitute the outgoing participant's presentation onto the transfer
    /// target and record the bidirectional links.
    fn perform_transfer(&mut self, ctx: &EngineContext, target_id: ConnectionId) {
        let Some(from_id) = self.transfer.from_connection else {
            return;
        };
        let outgoing = match self.connections.iter().find(|c| c.id == from_id) {
            Some(connection) => connection.participant.clone(),
            None => return,
        };
        let call_id = self.id;
        if let Some(target) = self.connection_mut(target_id) {
            target.participant.substitute_from(&outgoing);
            ctx.emit(CallEvent::ParticipantEvent {
                call_id,
                connection_id: target_id,
                kind: ParticipantEventKind::IdentityChanged,
            });
        }
        if let Some(from) = self.connection_mut(from_id) {
            from.participant.transferred_to = Some(target_id);
        }
        info!(%call_id, %from_id, %target_id, "participant transferred");
    }

    /// Dispatch one raw sideband frame received on a session.
    pub async fn handle_frame(
        &mut self,
        ctx: &Arc<EngineContext>,
        connection_id: ConnectionId,
        frame: Bytes,
    ) -> EngineResult<()> {
        let message = IqMessage::decode(frame)?;
        let zoom_policy = ctx.config.zoom_policy;
        let local_camera = self.local_camera;
        let signals = match self.connection_mut(connection_id) {
            Some(connection) => connection.handle_message(message, zoom_policy, &local_camera),
            None => {
                return Err(EngineError::ConnectionNotFound { connection_id });
            }
        };
        self.process_signals(ctx, connection_id, signals).await
    }

    /// Apply the peer's capability advertisement on data-channel open.
    pub fn on_peer_version(&mut self, connection_id: ConnectionId, version: &str) {
        if let Some(connection) = self.connection_mut(connection_id) {
            connection.apply_version_string(version);
        }
    }

    pub(crate) async fn send_on_connection(
        &mut self,
        ctx: &EngineContext,
        connection_id: ConnectionId,
        frame: Bytes,
    ) {
        let session_id = self
            .connections
            .iter()
            .find(|c| c.id == connection_id && !c.status().is_terminated())
            .and_then(|c| c.session_id);
        if let Some(session_id) = session_id {
            if let Err(code) = ctx.peer_connections.send_frame(session_id, frame).await {
                debug!(%session_id, ?code, "sideband frame not delivered");
            }
        }
    }

    async fn process_signals(
        &mut self,
        ctx: &Arc<EngineContext>,
        connection_id: ConnectionId,
        signals: Vec<ConnectionSignal>,
    ) -> EngineResult<()> {
        let call_id = self.id;
        for signal in signals {
            match signal {
                ConnectionSignal::StatusChanged => self.emit_status(ctx),
                ConnectionSignal::FirstConnected => {
                    self.handle_first_connected(ctx, connection_id).await?;
                }
                ConnectionSignal::PeerHold => {
                    ctx.emit(CallEvent::ParticipantEvent {
                        call_id,
                        connection_id,
                        kind: ParticipantEventKind::PeerHold,
                    });
                }
                ConnectionSignal::PeerResume => {
                    ctx.emit(CallEvent::ParticipantEvent {
                        call_id,
                        connection_id,
                        kind: ParticipantEventKind::PeerResume,
                    });
                }
                ConnectionSignal::SendFrame(frame) => {
                    self.send_on_connection(ctx, connection_id, frame).await;
                }
                ConnectionSignal::CameraAsk => {
                    ctx.emit(CallEvent::CameraControlAsk {
                        call_id,
                        connection_id,
                    });
                }
                ConnectionSignal::CameraGranted => {
                    ctx.emit(CallEvent::CameraControlGranted {
                        call_id,
                        connection_id,
                    });
                }
                ConnectionSignal::CameraRevoked => {
                    ctx.emit(CallEvent::CameraControlRevoked {
                        call_id,
                        connection_id,
                    });
                }
                ConnectionSignal::CameraAction {
                    mode,
                    camera,
                    scale,
                    request_id,
                } => {
                    self.apply_camera_action(ctx, connection_id, mode, camera, scale, request_id)
                        .await;
                }
                ConnectionSignal::PrepareTransferReceived => {
                    // Ack already queued by the connection.
                }
                ConnectionSignal::PrepareAck => {
                    self.on_prepare_ack(ctx, connection_id).await?;
                }
                ConnectionSignal::TransferDone => {
                    // The target says we may disconnect; expected handover.
                    self.remove_connection(ctx, connection_id, TerminateReason::TransferDone)
                        .await;
                }
                ConnectionSignal::ParticipantTransfer(member) => {
                    self.transfer.from_connection = Some(connection_id);
                    self.transfer.to_member = Some(member);
                    // Member-addressed replacements come from another device;
                    // a browser endpoint declares itself through the local
                    // transfer API instead.
                    self.transfer.direction = TransferDirection::ToDevice;
                }
                ConnectionSignal::ParticipantUpdated => {
                    ctx.emit(CallEvent::ParticipantEvent {
                        call_id,
                        connection_id,
                        kind: ParticipantEventKind::IdentityChanged,
                    });
                }
                ConnectionSignal::StreamingControl { op, position_ms } => {
                    self.on_streaming_control(ctx, op, position_ms);
                }
                ConnectionSignal::StreamingData { .. } => {
                    // Media bytes pass through opaquely; nothing to track.
                }
                ConnectionSignal::StreamingInfo {
                    title,
                    duration_ms,
                    mime_type,
                } => {
                    if let Some(streaming) = &mut self.streaming {
                        streaming.apply_info(title.clone(), duration_ms, mime_type);
                    }
                    ctx.emit(CallEvent::Streaming {
                        call_id,
                        kind: StreamingEventKind::Info { title, duration_ms },
                    });
                }
                ConnectionSignal::StreamingRequest { position_ms } => {
                    ctx.emit(CallEvent::Streaming {
                        call_id,
                        kind: StreamingEventKind::DataRequested { position_ms },
                    });
                }
                ConnectionSignal::KeyCheck(kind) => {
                    ctx.emit(CallEvent::KeyCheck {
                        call_id,
                        connection_id,
                        kind,
                    });
                }
            }
        }
        Ok(())
    }

    fn on_streaming_control(&mut self, ctx: &EngineContext, op: StreamingOp, position_ms: i64) {
        let call_id = self.id;
        if op == StreamingOp::Start {
            // Starting replaces any current session, stopping it silently.
            if let Some(previous) = &mut self.streaming {
                previous.stop();
            }
            let mut session = StreamingSession::new();
            session.apply_control(op, position_ms);
            self.streaming = Some(session);
            ctx.emit(CallEvent::Streaming {
                call_id,
                kind: StreamingEventKind::Started,
            });
            return;
        }
        let Some(streaming) = &mut self.streaming else {
            return;
        };
        if !streaming.apply_control(op, position_ms) {
            return;
        }
        let kind = match op {
            StreamingOp::Pause => StreamingEventKind::Paused,
            StreamingOp::Resume => StreamingEventKind::Resumed,
            StreamingOp::Stop => StreamingEventKind::Stopped,
            StreamingOp::Start | StreamingOp::Seek => return,
        };
        if streaming.is_stopped() {
            self.streaming = None;
        }
        ctx.emit(CallEvent::Streaming { call_id, kind });
    }

    async fn apply_camera_action(
        &mut self,
        ctx: &Arc<EngineContext>,
        connection_id: ConnectionId,
        mode: CameraMode,
        camera: i32,
        scale: f64,
        request_id: i64,
    ) {
        let result = match mode {
            CameraMode::On => ctx.peer_connections.set_camera_mute(false).await,
            CameraMode::Off => ctx.peer_connections.set_camera_mute(true).await,
            CameraMode::Select => ctx.peer_connections.select_camera(camera).await,
            CameraMode::Zoom => ctx.peer_connections.set_zoom(scale).await,
            CameraMode::Check | CameraMode::Stop => Ok(()),
        };
        let error = match result {
            Ok(()) => {
                if mode == CameraMode::Select {
                    // Camera index 0 is the front camera.
                    self.camera_facing = if camera == 0 {
                        CameraFacing::Front
                    } else {
                        CameraFacing::Back
                    };
                }
                CameraError::Success
            }
            Err(code) => {
                warn!(?mode, ?code, "camera action failed");
                CameraError::Failure
            }
        };
        let frame = camera_response(request_id, error, &self.local_camera);
        self.send_on_connection(ctx, connection_id, frame).await;
    }

    /// Flip the local camera and record which one the call now sends from.
    pub async fn switch_camera(
        &mut self,
        ctx: &Arc<EngineContext>,
        facing: CameraFacing,
    ) -> EngineResult<()> {
        ctx.peer_connections.switch_camera(facing).await?;
        self.camera_facing = facing;
        Ok(())
    }

    /// Put the whole call on local hold.
    pub async fn hold(&mut self, ctx: &Arc<EngineContext>) -> EngineResult<()> {
        if self.on_hold {
            return Ok(());
        }
        self.on_hold = true;
        let mut frames = Vec::new();
        for connection in &mut self.connections {
            if connection.set_local_hold(true) {
                if let Some(session_id) = connection.session_id {
                    frames.push(session_id);
                }
            }
        }
        for session_id in frames {
            let frame = HoldCallIq {
                request_id: ctx.next_request_id(),
            }
            .encode();
            if let Err(code) = ctx.peer_connections.send_frame(session_id, frame).await {
                debug!(%session_id, ?code, "hold notification not delivered");
            }
            let _ = ctx.peer_connections.set_audio_direction(session_id, false).await;
        }
        self.emit_status(ctx);
        Ok(())
    }

    /// Resume the call from local hold.
    pub async fn resume(&mut self, ctx: &Arc<EngineContext>) -> EngineResult<()> {
        if !self.on_hold {
            return Ok(());
        }
        self.on_hold = false;
        let mut frames = Vec::new();
        for connection in &mut self.connections {
            if connection.set_local_hold(false) {
                if let Some(session_id) = connection.session_id {
                    frames.push(session_id);
                }
            }
        }
        for session_id in frames {
            let frame = ResumeCallIq {
                request_id: ctx.next_request_id(),
            }
            .encode();
            if let Err(code) = ctx.peer_connections.send_frame(session_id, frame).await {
                debug!(%session_id, ?code, "resume notification not delivered");
            }
            let _ = ctx.peer_connections.set_audio_direction(session_id, true).await;
        }
        self.emit_status(ctx);
        Ok(())
    }

    /// Start a streaming session towards stream-capable peers, replacing
    /// (stopping silently) any current one.
    pub async fn start_streaming(&mut self, ctx: &Arc<EngineContext>) -> EngineResult<()> {
        if let Some(previous) = &mut self.streaming {
            previous.stop();
        }
        let mut session = StreamingSession::new();
        session.apply_control(StreamingOp::Start, 0);
        self.streaming = Some(session);
        let frame = StreamingControlIq {
            request_id: ctx.next_request_id(),
            op: StreamingOp::Start,
            position_ms: 0,
        }
        .encode();
        for session_id in self.capability_targets(|c| c.capabilities.stream.is_supported()) {
            ctx.peer_connections.send_frame(session_id, frame.clone()).await?;
        }
        ctx.emit(CallEvent::Streaming {
            call_id: self.id,
            kind: StreamingEventKind::Started,
        });
        Ok(())
    }

    /// Stop the current streaming session, notifying the peers.
    pub async fn stop_streaming(&mut self, ctx: &Arc<EngineContext>) -> EngineResult<()> {
        let Some(streaming) = &mut self.streaming else {
            return Ok(());
        };
        let position_ms = streaming.position_ms;
        streaming.stop();
        self.streaming = None;
        let frame = StreamingControlIq {
            request_id: ctx.next_request_id(),
            op: StreamingOp::Stop,
            position_ms,
        }
        .encode();
        for session_id in self.capability_targets(|c| c.capabilities.stream.is_supported()) {
            ctx.peer_connections.send_frame(session_id, frame.clone()).await?;
        }
        ctx.emit(CallEvent::Streaming {
            call_id: self.id,
            kind: StreamingEventKind::Stopped,
        });
        Ok(())
    }

    /// Sessions of live connections matching a capability predicate.
    pub fn capability_targets<F>(&self, predicate: F) -> Vec<SessionId>
    where
        F: Fn(&CallConnection) -> bool,
    {
        self.connections
            .iter()
            .filter(|c| !c.status().is_terminated())
            .filter(|c| predicate(c))
            .filter_map(|c| c.session_id)
            .collect()
    }

    /// Append a message descriptor; returns the sessions of peers that
    /// advertise descriptor support.
    pub fn send_message(&mut self, ctx: &EngineContext, text: String) -> Vec<SessionId> {
        let descriptor = self.descriptors.push_message(text, true);
        ctx.emit(CallEvent::DescriptorPushed {
            call_id: self.id,
            descriptor,
        });
        self.capability_targets(|c| c.capabilities.message.is_supported())
    }

    /// Create or update the geolocation descriptor; returns the sessions of
    /// peers that advertise geolocation support.
    pub fn send_geolocation(
        &mut self,
        ctx: &EngineContext,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
    ) -> Vec<SessionId> {
        let (descriptor, change) =
            self.descriptors
                .set_geolocation(latitude, longitude, altitude, true);
        let event = match change {
            GeolocationChange::Created => CallEvent::DescriptorPushed {
                call_id: self.id,
                descriptor,
            },
            GeolocationChange::Updated => CallEvent::DescriptorUpdated {
                call_id: self.id,
                descriptor,
            },
        };
        ctx.emit(event);
        self.capability_targets(|c| c.capabilities.geoloc.is_supported())
    }

    /// Remove the geolocation descriptor.
    pub fn clear_geolocation(&mut self, ctx: &EngineContext) {
        if let Some(descriptor_id) = self.descriptors.clear_geolocation() {
            ctx.emit(CallEvent::DescriptorDeleted {
                call_id: self.id,
                descriptor_id,
            });
        }
    }

    /// A connection's timer fired: re-check before acting, then time the
    /// leg out when it never reached the media path.
    pub async fn on_timer_expired(
        &mut self,
        ctx: &Arc<EngineContext>,
        connection_id: ConnectionId,
    ) {
        let timed_out = match self.connections.iter().find(|c| c.id == connection_id) {
            // A late timer firing into an already-resolved leg is a no-op.
            Some(connection) => {
                !connection.status().is_terminated()
                    && (connection.status().is_ringing() || connection.status().is_accepted())
            }
            None => false,
        };
        if timed_out {
            debug!(call_id = %self.id, %connection_id, "connection timed out");
            self.remove_connection(ctx, connection_id, TerminateReason::Timeout)
                .await;
        }
    }

    /// Terminate one leg, remove it from the call and emit the removal
    /// unless the reason marks a silent handover. Returns true when the
    /// call is empty afterwards.
    pub async fn remove_connection(
        &mut self,
        ctx: &Arc<EngineContext>,
        connection_id: ConnectionId,
        reason: TerminateReason,
    ) -> bool {
        let call_id = self.id;
        let Some(index) = self.connections.iter().position(|c| c.id == connection_id) else {
            return self.connections.is_empty();
        };
        self.last_removal_reason = Some(reason);
        let session = {
            let connection = &mut self.connections[index];
            if connection.terminate(reason) {
                connection.session_id
            } else {
                None
            }
        };
        if let Some(session_id) = session {
            let _ = ctx.peer_connections.release_renderer(session_id).await;
            if let Err(code) = ctx
                .peer_connections
                .terminate_session(session_id, reason)
                .await
            {
                debug!(%session_id, ?code, "session termination failed");
            }
            let request_id = ctx.register_request(PendingRequest::TerminateCall {
                call_id,
                connection_id,
            });
            if let Err(code) = ctx
                .signaling
                .terminate_call(request_id, session_id, reason)
                .await
            {
                debug!(%session_id, ?code, "terminate signaling failed");
                ctx.take_request(request_id);
            }
        }
        self.connections.remove(index);
        // A participant leaving before it acked counts as an ack, otherwise
        // the deferred replay would stall forever.
        self.transfer.pending_acks.remove(&connection_id);
        if self.transfer.pending_acks.is_empty() {
            if let Some(deferred) = self.transfer.deferred_connection.take() {
                let _ = self.handle_first_connected(ctx, deferred).await;
            }
        }
        // The outgoing device leaving ends the handshake either way.
        if self.transfer.from_connection == Some(connection_id) {
            self.transfer = TransferState::default();
        }
        if !reason.suppresses_removal() {
            ctx.emit(CallEvent::ParticipantRemoved {
                call_id,
                connection_id,
                reason,
            });
        }
        self.connections.is_empty()
    }

    /// Terminate every leg and finalize the call.
    pub async fn terminate(&mut self, ctx: &Arc<EngineContext>, reason: TerminateReason) {
        if self.terminate_reason.is_some() {
            return;
        }
        self.terminate_reason = Some(reason);
        let ids: Vec<ConnectionId> = self.connections.iter().map(|c| c.id).collect();
        for connection_id in ids {
            self.remove_connection(ctx, connection_id, reason).await;
        }
        if let Some(room) = &self.room {
            if let Some(member_id) = &room.member_id {
                let _ = ctx
                    .call_rooms
                    .leave_call_room(room.id, member_id.clone())
                    .await;
            }
        }
        if let Some(streaming) = &mut self.streaming {
            streaming.stop();
        }
        self.streaming = None;
        ctx.emit(CallEvent::CallTerminated {
            call_id: self.id,
            reason,
            missed: self.counts_as_missed(reason),
        });
        info!(call_id = %self.id, ?reason, "call terminated");
    }

    /// A never-connected incoming call ending for an unexpected reason is a
    /// missed call.
    pub fn counts_as_missed(&self, reason: TerminateReason) -> bool {
        self.direction == CallDirection::Incoming && !self.ever_connected && reason.counts_as_missed()
    }

    /// Reconnect-driven re-issue of requests that failed while offline.
    pub async fn on_service_reconnected(&mut self, ctx: &Arc<EngineContext>) -> EngineResult<()> {
        let retries = std::mem::take(&mut self.pending_retries);
        for pending in retries {
            match pending {
                PendingRequest::StartCall { connection_id, .. } => {
                    let peer_id = self.originator.peer_id;
                    let video = self.video;
                    let request_id = ctx.register_request(pending);
                    match ctx.signaling.start_call(request_id, peer_id, video).await {
                        Ok(()) => {}
                        Err(ServiceErrorCode::ServiceUnavailable) => {
                            ctx.take_request(request_id);
                            self.pending_retries.push(pending);
                        }
                        Err(ServiceErrorCode::ItemNotFound) => {
                            ctx.take_request(request_id);
                            self.remove_connection(ctx, connection_id, TerminateReason::Gone)
                                .await;
                        }
                        Err(code) => {
                            ctx.take_request(request_id);
                            warn!(?code, "start call retry failed");
                            self.remove_connection(
                                ctx,
                                connection_id,
                                TerminateReason::ConnectivityError,
                            )
                            .await;
                        }
                    }
                }
                other => {
                    // Room operations are re-driven by their own callbacks;
                    // re-register so the correlation table stays accurate.
                    ctx.register_request(other);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Originator {
        Originator::contact(PeerId::new())
    }

    fn incoming_call() -> CallState {
        CallState::new_incoming(contact(), SessionId::new(), false)
    }

    #[test]
    fn test_empty_call_is_terminated() {
        let mut call = incoming_call();
        call.connections.clear();
        assert_eq!(call.status(), CallStatus::Terminated);
        assert!(call.is_empty());
    }

    #[test]
    fn test_active_connection_wins_aggregation() {
        let mut call = incoming_call();
        let mut second = CallConnection::new_outgoing(call.id, PeerId::new(), false);
        second.set_ringing();
        second.set_accepted();
        second.on_transport_state(ConnectionState::Connected);
        call.connections.push(second);
        // First leg is still IncomingCall, second is InCall; active wins.
        assert_eq!(call.status(), CallStatus::InCall);
    }

    #[test]
    fn test_accepted_wins_over_ringing() {
        let mut call = incoming_call();
        let mut second = CallConnection::new_outgoing(call.id, PeerId::new(), false);
        second.set_ringing();
        second.set_accepted();
        call.connections.push(second);
        assert_eq!(call.status(), CallStatus::AcceptedOutgoingCall);
    }

    #[test]
    fn test_first_connection_status_is_the_fallback() {
        let mut call = incoming_call();
        call.connections[0].set_ringing();
        let second = CallConnection::new_outgoing(call.id, PeerId::new(), false);
        call.connections.push(second);
        assert_eq!(call.status(), CallStatus::IncomingBell);
    }

    #[test]
    fn test_local_hold_overrides_everything() {
        let mut call = incoming_call();
        call.connections[0].set_ringing();
        call.connections[0].set_accepted();
        call.connections[0].on_transport_state(ConnectionState::Connected);
        call.on_hold = true;
        assert_eq!(call.status(), CallStatus::OnHold);
    }

    #[test]
    fn test_all_peer_on_hold_aggregates_to_peer_on_hold() {
        let mut call = incoming_call();
        call.connections[0].set_ringing();
        call.connections[0].set_accepted();
        call.connections[0].on_transport_state(ConnectionState::Connected);
        let camera = CameraInfo::default();
        call.connections[0].handle_message(
            IqMessage::HoldCall(HoldCallIq { request_id: 1 }),
            crate::capabilities::ZoomPolicy::Never,
            &camera,
        );
        assert_eq!(call.status(), CallStatus::PeerOnHold);
    }

    #[test]
    fn test_missed_call_classification() {
        let call = incoming_call();
        assert!(call.counts_as_missed(TerminateReason::Timeout));
        assert!(!call.counts_as_missed(TerminateReason::TransferDone));
        assert!(!call.counts_as_missed(TerminateReason::Merge));
        let outgoing = CallState::new_outgoing(contact(), false);
        assert!(!outgoing.counts_as_missed(TerminateReason::Timeout));
    }
}
