//! The call orchestrator.
//!
//! An explicit instance owned by the host application; there is no global
//! state. It holds at most one active and one held call, routes inbound
//! transport and call-room callbacks to the right aggregate through lock
//! free maps, correlates asynchronous requests by id, and drives call
//! switching and merging. Lock order is orchestrator slots first, then one
//! call at a time (active before held when both are needed); calls never
//! lock anything outside themselves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use meshcall_wire::messages::{CameraControlIq, CameraMode, ResumeCallIq};

use crate::call::CallState;
use crate::config::CallConfig;
use crate::connection::CallConnection;
use crate::context::{EngineCommand, EngineContext, PendingRequest};
use crate::error::{EngineError, EngineResult};
use crate::events::{CallEvent, CallEventHandler};
use crate::ops::{CallOperation, ConnectionOperation};
use crate::service::{
    CallRoomJoinInfo, CallRoomMember, CallRoomService, IdentityResolver, PeerConnectionService,
    ResolvedIdentity, ServiceErrorCode, SignalingService,
};
use crate::types::{
    CallId, CallRoomId, CallStatus, CameraFacing, ConnectionId, ConnectionState, MemberId,
    Originator, PeerId, SessionId, TerminateReason, TransferDirection,
};

/// Engine statistics, recomputed from live state.
#[derive(Debug, Clone, Serialize)]
pub struct CallStats {
    /// Calls created since the engine started
    pub total_calls: u64,
    /// Connections created since the engine started
    pub total_connections: u64,
    /// Calls currently tracked (including those in their grace period)
    pub current_calls: usize,
    /// Whether the active slot is occupied
    pub has_active_call: bool,
    /// Whether the held slot is occupied
    pub has_held_call: bool,
    /// Requests still awaiting a service callback
    pub pending_requests: usize,
}

#[derive(Debug, Default)]
struct Slots {
    active: Option<CallId>,
    held: Option<CallId>,
}

/// Top-level coordinator of the call engine.
pub struct CallOrchestrator {
    context: Arc<EngineContext>,
    calls: DashMap<CallId, Arc<Mutex<CallState>>>,
    connection_routes: DashMap<ConnectionId, CallId>,
    session_routes: DashMap<SessionId, (CallId, ConnectionId)>,
    originator_routes: DashMap<PeerId, CallId>,
    room_routes: DashMap<CallRoomId, CallId>,
    slots: Mutex<Slots>,
    event_handlers: Arc<RwLock<Vec<(String, Arc<dyn CallEventHandler>)>>>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<CallEvent>>>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineCommand>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    total_calls: AtomicU64,
    total_connections: AtomicU64,
}

impl CallOrchestrator {
    /// Build an orchestrator around the host-provided services.
    pub fn new(
        config: CallConfig,
        signaling: Arc<dyn SignalingService>,
        peer_connections: Arc<dyn PeerConnectionService>,
        call_rooms: Arc<dyn CallRoomService>,
        identities: Arc<dyn IdentityResolver>,
    ) -> EngineResult<Arc<Self>> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let context = Arc::new(EngineContext::new(
            config,
            signaling,
            peer_connections,
            call_rooms,
            identities,
            event_tx,
            command_tx,
        ));
        Ok(Arc::new(Self {
            context,
            calls: DashMap::new(),
            connection_routes: DashMap::new(),
            session_routes: DashMap::new(),
            originator_routes: DashMap::new(),
            room_routes: DashMap::new(),
            slots: Mutex::new(Slots::default()),
            event_handlers: Arc::new(RwLock::new(Vec::new())),
            event_rx: Mutex::new(Some(event_rx)),
            command_rx: Mutex::new(Some(command_rx)),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            total_calls: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
        }))
    }

    /// Start the event fan-out and the internal command loop.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut event_rx = self
            .event_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::invalid_state("orchestrator already consumed"))?;
        let handlers = Arc::clone(&self.event_handlers);
        let event_task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let handlers = handlers.read().await;
                for (_, handler) in handlers.iter() {
                    handler.on_event(event.clone()).await;
                }
            }
        });
        let mut command_rx = self
            .command_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::invalid_state("orchestrator already consumed"))?;
        let this = Arc::clone(self);
        let command_task = tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                this.handle_command(command).await;
            }
        });
        let mut tasks = self.tasks.lock().await;
        tasks.push(event_task);
        tasks.push(command_task);
        info!("call engine started");
        Ok(())
    }

    /// Stop the engine, terminating every live call.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<CallId> = self.calls.iter().map(|e| *e.key()).collect();
        for call_id in ids {
            if let Ok(call) = self.call(call_id) {
                let mut guard = call.lock().await;
                guard.terminate(&self.context, TerminateReason::Success).await;
            }
            self.cleanup_call(call_id).await;
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!("call engine stopped");
    }

    /// Register an event handler under a unique name.
    pub async fn add_event_handler(&self, name: impl Into<String>, handler: Arc<dyn CallEventHandler>) {
        let mut handlers = self.event_handlers.write().await;
        handlers.push((name.into(), handler));
    }

    /// Remove the event handler registered under a name.
    pub async fn remove_event_handler(&self, name: &str) {
        let mut handlers = self.event_handlers.write().await;
        handlers.retain(|(n, _)| n != name);
    }

    fn ensure_started(&self) -> EngineResult<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::NotStarted)
        }
    }

    fn call(&self, call_id: CallId) -> EngineResult<Arc<Mutex<CallState>>> {
        self.calls
            .get(&call_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::CallNotFound { call_id })
    }

    fn route_session(
        &self,
        session_id: SessionId,
    ) -> EngineResult<(Arc<Mutex<CallState>>, ConnectionId)> {
        let (call_id, connection_id) = self
            .session_routes
            .get(&session_id)
            .map(|entry| *entry.value())
            .ok_or(EngineError::SessionNotRouted { session_id })?;
        Ok((self.call(call_id)?, connection_id))
    }

    /// The call currently in the active slot.
    pub async fn active_call_id(&self) -> Option<CallId> {
        self.slots.lock().await.active
    }

    /// The call currently in the held slot.
    pub async fn held_call_id(&self) -> Option<CallId> {
        self.slots.lock().await.held
    }

    /// Aggregated status of one call.
    pub async fn call_status(&self, call_id: CallId) -> EngineResult<CallStatus> {
        let call = self.call(call_id)?;
        let guard = call.lock().await;
        Ok(guard.status())
    }

    /// Engine statistics.
    pub async fn stats(&self) -> CallStats {
        let slots = self.slots.lock().await;
        CallStats {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            current_calls: self.calls.len(),
            has_active_call: slots.active.is_some(),
            has_held_call: slots.held.is_some(),
            pending_requests: self.context.pending_request_count(),
        }
    }

    fn register_connection_routes(&self, call_id: CallId, connection: &CallConnection) {
        self.connection_routes.insert(connection.id, call_id);
        if let Some(session_id) = connection.session_id {
            self.session_routes.insert(session_id, (call_id, connection.id));
        }
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    async fn cleanup_call(&self, call_id: CallId) {
        self.context.drain_requests_for_call(call_id);
        self.connection_routes.retain(|_, v| *v != call_id);
        self.session_routes.retain(|_, (c, _)| *c != call_id);
        self.originator_routes.retain(|_, v| *v != call_id);
        self.room_routes.retain(|_, v| *v != call_id);
        {
            let mut slots = self.slots.lock().await;
            if slots.active == Some(call_id) {
                slots.active = None;
            }
            if slots.held == Some(call_id) {
                slots.held = None;
            }
        }
        // The call record lingers for the grace period so late callbacks
        // still resolve, then the command loop releases it.
        let ctx = Arc::clone(&self.context);
        let grace = ctx.config.shutdown_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            ctx.send_command(EngineCommand::ReleaseCall { call_id });
        });
    }

    /// Terminate a call that emptied out, then release its resources.
    async fn finalize_if_empty(&self, call: &Arc<Mutex<CallState>>, fallback: TerminateReason) {
        let (empty, call_id) = {
            let mut guard = call.lock().await;
            if guard.is_empty() && guard.terminate_reason.is_none() {
                let reason = guard.last_removal_reason.unwrap_or(fallback);
                guard.terminate(&self.context, reason).await;
            }
            (guard.is_empty(), guard.id)
        };
        if empty {
            self.cleanup_call(call_id).await;
        }
    }

    async fn handle_command(&self, command: EngineCommand) {
        match command {
            EngineCommand::ConnectionTimerExpired {
                call_id,
                connection_id,
            } => {
                if let Ok(call) = self.call(call_id) {
                    {
                        let mut guard = call.lock().await;
                        guard.on_timer_expired(&self.context, connection_id).await;
                    }
                    self.finalize_if_empty(&call, TerminateReason::Timeout).await;
                }
            }
            EngineCommand::ReleaseCall { call_id } => {
                if self.calls.remove(&call_id).is_some() {
                    debug!(%call_id, "call record released");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Outgoing actions
    // ------------------------------------------------------------------

    /// Place an outgoing call. A currently active call is put on hold and
    /// moved to the held slot; with both slots occupied the engine is busy.
    pub async fn place_call(&self, originator: Originator, video: bool) -> EngineResult<CallId> {
        self.ensure_started()?;
        let mut slots = self.slots.lock().await;
        if slots.active.is_some() && slots.held.is_some() {
            return Err(EngineError::Busy);
        }
        if let Some(active_id) = slots.active.take() {
            if let Ok(active) = self.call(active_id) {
                let mut guard = active.lock().await;
                guard.hold(&self.context).await?;
                slots.held = Some(active_id);
            }
        }
        let state = CallState::new_outgoing(originator.clone(), video);
        let call_id = state.id;
        slots.active = Some(call_id);
        drop(slots);

        for connection in &state.connections {
            self.register_connection_routes(call_id, connection);
        }
        self.originator_routes.insert(originator.peer_id, call_id);
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let call = Arc::new(Mutex::new(state));
        self.calls.insert(call_id, Arc::clone(&call));

        let mut guard = call.lock().await;
        if let Err(e) = guard.start(&self.context).await {
            guard
                .terminate(&self.context, TerminateReason::ConnectivityError)
                .await;
            drop(guard);
            self.cleanup_call(call_id).await;
            return Err(e);
        }
        // The outgoing session exists now; route it.
        if let Some(connection) = guard.connections.first() {
            if let Some(session_id) = connection.session_id {
                self.session_routes
                    .insert(session_id, (call_id, connection.id));
            }
        }
        guard.emit_status(&self.context);
        Ok(call_id)
    }

    /// Accept an incoming call.
    pub async fn accept_call(&self, call_id: CallId) -> EngineResult<()> {
        self.ensure_started()?;
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.accept(&self.context).await
    }

    /// Terminate a call with a reason.
    pub async fn terminate_call(&self, call_id: CallId, reason: TerminateReason) -> EngineResult<()> {
        let call = self.call(call_id)?;
        {
            let mut guard = call.lock().await;
            guard.terminate(&self.context, reason).await;
        }
        self.cleanup_call(call_id).await;
        Ok(())
    }

    /// Put a call on local hold.
    pub async fn hold_call(&self, call_id: CallId) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.hold(&self.context).await
    }

    /// Resume a call from local hold.
    pub async fn resume_call(&self, call_id: CallId) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.resume(&self.context).await
    }

    /// Swap the active and held calls: the newly held one is put on hold,
    /// the newly active one resumed, peers notified on both.
    pub async fn switch_calls(&self) -> EngineResult<()> {
        self.ensure_started()?;
        let (active_id, held_id) = {
            let slots = self.slots.lock().await;
            match (slots.active, slots.held) {
                (Some(a), Some(h)) => (a, h),
                _ => {
                    return Err(EngineError::invalid_state(
                        "switch requires an active and a held call",
                    ))
                }
            }
        };
        {
            let active = self.call(active_id)?;
            let mut guard = active.lock().await;
            guard.hold(&self.context).await?;
        }
        {
            let held = self.call(held_id)?;
            let mut guard = held.lock().await;
            guard.resume(&self.context).await?;
        }
        let mut slots = self.slots.lock().await;
        slots.active = Some(held_id);
        slots.held = Some(active_id);
        info!(active = %held_id, held = %active_id, "calls switched");
        Ok(())
    }

    /// Merge the held call into the active one: every held connection is
    /// reassigned, resumed locally and peer-resumed; the emptied held call
    /// terminates with reason Merge and is never a missed call.
    pub async fn merge_calls(&self) -> EngineResult<()> {
        self.ensure_started()?;
        let (active_id, held_id) = {
            let slots = self.slots.lock().await;
            match (slots.active, slots.held) {
                (Some(a), Some(h)) => (a, h),
                _ => {
                    return Err(EngineError::invalid_state(
                        "merge requires an active and a held call",
                    ))
                }
            }
        };
        let active = self.call(active_id)?;
        let held = self.call(held_id)?;
        let mut resumed_sessions = Vec::new();
        {
            // Active before held, matching every other two-call path.
            let mut active_guard = active.lock().await;
            let mut held_guard = held.lock().await;
            let moved: Vec<CallConnection> = held_guard.connections.drain(..).collect();
            for mut connection in moved {
                connection.call_id = active_id;
                connection.set_local_hold(false);
                self.connection_routes.insert(connection.id, active_id);
                if let Some(session_id) = connection.session_id {
                    self.session_routes
                        .insert(session_id, (active_id, connection.id));
                    resumed_sessions.push(session_id);
                }
                debug!(connection_id = %connection.id, from = %held_id, to = %active_id, "connection reassigned");
                active_guard.connections.push(connection);
            }
            drop(held_guard);
            active_guard.emit_status(&self.context);
        }
        for session_id in resumed_sessions {
            let frame = ResumeCallIq {
                request_id: self.context.next_request_id(),
            }
            .encode();
            if let Err(code) = self.context.peer_connections.send_frame(session_id, frame).await {
                debug!(%session_id, ?code, "resume notification not delivered");
            }
            let _ = self
                .context
                .peer_connections
                .set_audio_direction(session_id, true)
                .await;
        }
        {
            let mut held_guard = held.lock().await;
            held_guard.terminate(&self.context, TerminateReason::Merge).await;
        }
        self.cleanup_call(held_id).await;
        info!(active = %active_id, merged = %held_id, "calls merged");
        Ok(())
    }

    /// Create the call room for a group call.
    pub async fn create_call_room(&self, call_id: CallId) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.create_call_room(&self.context).await
    }

    /// Join a call room the host learned about (for example from a group
    /// invite). On a still-ringing incoming call the join is recorded and
    /// executed when the user accepts.
    pub async fn join_call_room(&self, call_id: CallId, room_id: CallRoomId) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.join_call_room(&self.context, room_id, false).await
    }

    /// Begin a device transfer towards a call-room member.
    pub async fn prepare_transfer(
        &self,
        call_id: CallId,
        to_member: MemberId,
        direction: TransferDirection,
    ) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.prepare_transfer(&self.context, to_member, direction).await
    }

    /// Direction of a call's in-progress transfer, `None` when idle.
    pub async fn transfer_direction(&self, call_id: CallId) -> EngineResult<TransferDirection> {
        let call = self.call(call_id)?;
        let guard = call.lock().await;
        Ok(guard.transfer.direction)
    }

    /// Flip the local camera used by a call.
    pub async fn switch_camera(&self, call_id: CallId, facing: CameraFacing) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.switch_camera(&self.context, facing).await
    }

    /// Which local camera a call is sending from.
    pub async fn camera_facing(&self, call_id: CallId) -> EngineResult<CameraFacing> {
        let call = self.call(call_id)?;
        let guard = call.lock().await;
        Ok(guard.camera_facing)
    }

    /// Start a streaming session on a call.
    pub async fn start_streaming(&self, call_id: CallId) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.start_streaming(&self.context).await
    }

    /// Stop the current streaming session on a call.
    pub async fn stop_streaming(&self, call_id: CallId) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.stop_streaming(&self.context).await
    }

    /// Append a message descriptor; returns the sessions of peers that
    /// advertise descriptor support, for the host's conversation channel.
    pub async fn send_message(&self, call_id: CallId, text: String) -> EngineResult<Vec<SessionId>> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        Ok(guard.send_message(&self.context, text))
    }

    /// Create or update the shared geolocation descriptor; returns the
    /// sessions of peers that advertise geolocation support.
    pub async fn send_geolocation(
        &self,
        call_id: CallId,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
    ) -> EngineResult<Vec<SessionId>> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        Ok(guard.send_geolocation(&self.context, latitude, longitude, altitude))
    }

    /// Delete the shared geolocation descriptor.
    pub async fn clear_geolocation(&self, call_id: CallId) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        guard.clear_geolocation(&self.context);
        Ok(())
    }

    /// The local user confirmed a pending camera-control request (ASK
    /// policy); grant it and send the deferred response.
    pub async fn grant_camera_control(
        &self,
        call_id: CallId,
        connection_id: ConnectionId,
    ) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        let camera = guard.local_camera;
        let frame = guard
            .connection_mut(connection_id)
            .and_then(|c| c.grant_camera(&camera));
        if let Some(frame) = frame {
            guard.send_on_connection(&self.context, connection_id, frame).await;
            self.context.emit(CallEvent::CameraControlGranted {
                call_id,
                connection_id,
            });
        }
        Ok(())
    }

    /// Ask a peer for control of its camera.
    pub async fn request_camera_control(
        &self,
        call_id: CallId,
        connection_id: ConnectionId,
    ) -> EngineResult<()> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        let frame = CameraControlIq {
            request_id: self.context.next_request_id(),
            mode: CameraMode::Check,
            camera: 0,
            scale: 0.0,
        }
        .encode();
        guard.send_on_connection(&self.context, connection_id, frame).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound transport callbacks
    // ------------------------------------------------------------------

    /// A new incoming P2P offer arrived. While a call is already active the
    /// offer is auto-accepted into a matching call (same group, same room
    /// originator, or a transfer link) or rejected busy.
    pub async fn on_incoming_session(
        &self,
        session_id: SessionId,
        originator: Originator,
        video: bool,
    ) -> EngineResult<CallId> {
        self.ensure_started()?;
        let identity = match self.context.identities.resolve(&originator).await {
            Ok(identity) => identity,
            Err(code) => {
                debug!(?code, "originator unresolved, using defaults");
                ResolvedIdentity {
                    name: String::new(),
                    description: None,
                    avatar: None,
                    auto_answer: false,
                    transfer_allowed: false,
                }
            }
        };
        let (active_id, held_id) = {
            let slots = self.slots.lock().await;
            (slots.active, slots.held)
        };
        if let Some(active_id) = active_id {
            if self.should_auto_accept(active_id, &originator, &identity).await {
                return self
                    .attach_incoming(active_id, session_id, &originator, video, &identity)
                    .await;
            }
            if let Some(held_id) = held_id {
                if self.should_auto_accept(held_id, &originator, &identity).await {
                    return self
                        .attach_incoming(held_id, session_id, &originator, video, &identity)
                        .await;
                }
            }
            // Neither slot admits the caller.
            info!(%session_id, "incoming offer rejected busy");
            let _ = self
                .context
                .peer_connections
                .terminate_session(session_id, TerminateReason::Busy)
                .await;
            return Err(EngineError::Busy);
        }

        // No call in progress: a fresh incoming call takes the active slot.
        let mut state = CallState::new_incoming(originator.clone(), session_id, video);
        let call_id = state.id;
        if let Some(connection) = state.connections.first_mut() {
            if !identity.name.is_empty() {
                connection.participant.name = Some(identity.name.clone());
            }
            connection.participant.description = identity.description.clone();
            connection.participant.avatar = identity.avatar.clone();
            connection.set_ringing();
        }
        let connection_id = state.connections[0].id;
        for connection in &state.connections {
            self.register_connection_routes(call_id, connection);
        }
        self.originator_routes.insert(originator.peer_id, call_id);
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        {
            let mut slots = self.slots.lock().await;
            slots.active = Some(call_id);
        }
        let call = Arc::new(Mutex::new(state));
        self.calls.insert(call_id, Arc::clone(&call));
        let mut guard = call.lock().await;
        let ring_timeout = self.context.config.incoming_ring_timeout;
        guard.arm_timer(&self.context, connection_id, ring_timeout);
        self.context.emit(CallEvent::IncomingCall {
            call_id,
            connection_id,
            originator,
            video,
        });
        guard.emit_status(&self.context);
        if identity.auto_answer {
            guard.accept(&self.context).await?;
        }
        Ok(call_id)
    }

    async fn should_auto_accept(
        &self,
        call_id: CallId,
        originator: &Originator,
        identity: &ResolvedIdentity,
    ) -> bool {
        let Ok(call) = self.call(call_id) else {
            return false;
        };
        let guard = call.lock().await;
        // Same group: another member of the group call.
        if guard.originator.group_id.is_some() && guard.originator.group_id == originator.group_id
        {
            return true;
        }
        // Same call-room originator: another device or room member of the
        // identity this call was placed to/from.
        if guard.room.is_some() && guard.originator.peer_id == originator.peer_id {
            return true;
        }
        // Transfer link: the expected transfer target connecting back.
        if guard.transfer.to_member.is_some() && identity.transfer_allowed {
            return true;
        }
        false
    }

    async fn attach_incoming(
        &self,
        call_id: CallId,
        session_id: SessionId,
        originator: &Originator,
        video: bool,
        identity: &ResolvedIdentity,
    ) -> EngineResult<CallId> {
        let call = self.call(call_id)?;
        let mut guard = call.lock().await;
        let mut connection =
            CallConnection::new_incoming(call_id, session_id, originator.peer_id, video);
        if !identity.name.is_empty() {
            connection.participant.name = Some(identity.name.clone());
        }
        connection.participant.avatar = identity.avatar.clone();
        // The peer is already part of the room or transfer; never re-invite.
        connection.invited = true;
        connection.set_ringing();
        connection.set_accepted();
        self.register_connection_routes(call_id, &connection);
        self.context.emit(CallEvent::ParticipantAdded {
            call_id,
            participant: connection.participant.clone(),
        });
        guard.connections.push(connection);
        self.context
            .peer_connections
            .accept_session(session_id, video)
            .await?;
        guard.emit_status(&self.context);
        info!(%call_id, %session_id, "incoming offer auto-accepted");
        Ok(call_id)
    }

    /// The transport reports a session state change.
    pub async fn on_connection_state_changed(
        &self,
        session_id: SessionId,
        state: ConnectionState,
    ) -> EngineResult<()> {
        let (call, connection_id) = self.route_session(session_id)?;
        let reason = match state {
            ConnectionState::Failed => Some(TerminateReason::ConnectivityError),
            ConnectionState::Closed => Some(TerminateReason::Success),
            _ => None,
        };
        match reason {
            Some(reason) => {
                {
                    let mut guard = call.lock().await;
                    guard.remove_connection(&self.context, connection_id, reason).await;
                }
                self.session_routes.remove(&session_id);
                self.connection_routes.remove(&connection_id);
                self.finalize_if_empty(&call, reason).await;
            }
            None => {
                let mut guard = call.lock().await;
                guard
                    .on_connection_state(&self.context, connection_id, state)
                    .await?;
            }
        }
        Ok(())
    }

    /// The peer advertised its version/capability string on data-channel
    /// open.
    pub async fn on_peer_version(&self, session_id: SessionId, version: &str) -> EngineResult<()> {
        let (call, connection_id) = self.route_session(session_id)?;
        let mut guard = call.lock().await;
        guard.on_peer_version(connection_id, version);
        Ok(())
    }

    /// The peer accepted our outgoing offer.
    pub async fn on_peer_accepted(&self, session_id: SessionId) -> EngineResult<()> {
        let (call, connection_id) = self.route_session(session_id)?;
        let mut guard = call.lock().await;
        guard.on_peer_accepted(&self.context, connection_id);
        Ok(())
    }

    /// One sideband frame arrived on a session's data channel.
    pub async fn on_data_frame(&self, session_id: SessionId, frame: Bytes) -> EngineResult<()> {
        let (call, connection_id) = self.route_session(session_id)?;
        let result = {
            let mut guard = call.lock().await;
            guard.handle_frame(&self.context, connection_id, frame).await
        };
        if let Err(EngineError::Wire(fault)) = &result {
            // Decode failures are loud: a user-visible error plus the fault.
            let call_id = { call.lock().await.id };
            warn!(%session_id, %fault, "sideband frame rejected");
            self.context.emit(CallEvent::Error {
                call_id: Some(call_id),
                message: format!("sideband decode fault: {fault}"),
            });
        }
        self.finalize_if_empty(&call, TerminateReason::Success).await;
        result
    }

    // ------------------------------------------------------------------
    // Signaling and call-room callbacks
    // ------------------------------------------------------------------

    /// Outcome of a start-call request.
    pub async fn on_start_call_response(
        &self,
        request_id: i64,
        result: Result<(), ServiceErrorCode>,
    ) {
        let Some(pending) = self.context.take_request(request_id) else {
            warn!(request_id, "unmatched start call response");
            return;
        };
        let PendingRequest::StartCall {
            call_id,
            connection_id,
        } = pending
        else {
            warn!(request_id, "response does not match a start call request");
            return;
        };
        let Ok(call) = self.call(call_id) else {
            return;
        };
        {
            let mut guard = call.lock().await;
            match result {
                Ok(()) => guard.on_call_ringing(&self.context, connection_id),
                Err(ServiceErrorCode::ServiceUnavailable) => {
                    guard.pending_retries.push(pending);
                }
                Err(ServiceErrorCode::ItemNotFound) => {
                    guard
                        .remove_connection(&self.context, connection_id, TerminateReason::Gone)
                        .await;
                }
                Err(code) => {
                    warn!(%call_id, ?code, "start call failed");
                    guard
                        .remove_connection(
                            &self.context,
                            connection_id,
                            TerminateReason::ConnectivityError,
                        )
                        .await;
                }
            }
        }
        self.finalize_if_empty(&call, TerminateReason::Gone).await;
    }

    /// Outcome of an accept-call request.
    pub async fn on_accept_call_response(
        &self,
        request_id: i64,
        result: Result<(), ServiceErrorCode>,
    ) {
        let Some(PendingRequest::AcceptCall {
            call_id,
            connection_id,
        }) = self.context.take_request(request_id)
        else {
            warn!(request_id, "unmatched accept call response");
            return;
        };
        let Ok(call) = self.call(call_id) else {
            return;
        };
        {
            let mut guard = call.lock().await;
            match result {
                Ok(()) => {
                    guard.ops.mark_done(CallOperation::AcceptCall);
                }
                Err(ServiceErrorCode::ItemNotFound) => {
                    // Treated as already completed; the transport decides.
                    guard.ops.mark_done(CallOperation::AcceptCall);
                }
                Err(code) => {
                    warn!(%call_id, ?code, "accept call failed");
                    guard
                        .remove_connection(
                            &self.context,
                            connection_id,
                            TerminateReason::ConnectivityError,
                        )
                        .await;
                }
            }
        }
        self.finalize_if_empty(&call, TerminateReason::ConnectivityError)
            .await;
    }

    /// Outcome of a terminate-call request. Failures are absorbed: the leg
    /// is already gone locally.
    pub async fn on_terminate_call_response(
        &self,
        request_id: i64,
        result: Result<(), ServiceErrorCode>,
    ) {
        if self.context.take_request(request_id).is_none() {
            debug!(request_id, "unmatched terminate response");
        }
        if let Err(code) = result {
            debug!(request_id, ?code, "terminate reported an error");
        }
    }

    /// The call room was created.
    pub async fn on_create_call_room(
        &self,
        request_id: i64,
        result: Result<(CallRoomId, MemberId), ServiceErrorCode>,
    ) {
        let Some(pending) = self.context.take_request(request_id) else {
            warn!(request_id, "unmatched create room response");
            return;
        };
        let PendingRequest::CreateCallRoom { call_id } = pending else {
            warn!(request_id, "response does not match a create room request");
            return;
        };
        let Ok(call) = self.call(call_id) else {
            return;
        };
        let mut guard = call.lock().await;
        match result {
            Ok((room_id, member_id)) => {
                self.room_routes.insert(room_id, call_id);
                guard.on_create_call_room(room_id, member_id);
                if let Err(e) = guard.send_room_invites(&self.context).await {
                    warn!(%call_id, %e, "room invites failed");
                }
            }
            Err(ServiceErrorCode::ServiceUnavailable) => {
                guard.pending_retries.push(pending);
            }
            Err(code) => {
                warn!(%call_id, ?code, "create room failed");
                self.context.emit(CallEvent::Error {
                    call_id: Some(call_id),
                    message: format!("call room creation failed: {code}"),
                });
            }
        }
    }

    /// The call-room join response arrived with the full member list.
    pub async fn on_join_call_room(
        &self,
        request_id: i64,
        result: Result<CallRoomJoinInfo, ServiceErrorCode>,
    ) {
        let Some(pending) = self.context.take_request(request_id) else {
            warn!(request_id, "unmatched join room response");
            return;
        };
        let PendingRequest::JoinCallRoom { call_id } = pending else {
            warn!(request_id, "response does not match a join room request");
            return;
        };
        let Ok(call) = self.call(call_id) else {
            return;
        };
        let mut guard = call.lock().await;
        match result {
            Ok(info) => {
                self.room_routes.insert(info.room_id, call_id);
                match guard
                    .on_join_call_room(
                        &self.context,
                        info.room_id,
                        info.local_member_id,
                        info.members,
                        info.max_members,
                    )
                    .await
                {
                    Ok(created) => {
                        for connection in &guard.connections {
                            if created.contains(&connection.id) {
                                self.register_connection_routes(call_id, connection);
                            }
                        }
                    }
                    Err(e) => warn!(%call_id, %e, "join room handling failed"),
                }
            }
            Err(ServiceErrorCode::ServiceUnavailable) => {
                guard.pending_retries.push(pending);
            }
            Err(code) => {
                warn!(%call_id, ?code, "join room failed");
                self.context.emit(CallEvent::Error {
                    call_id: Some(call_id),
                    message: format!("call room join failed: {code}"),
                });
            }
        }
    }

    /// Outcome of a call-room invite.
    pub async fn on_invite_call_room(
        &self,
        request_id: i64,
        result: Result<(), ServiceErrorCode>,
    ) {
        let Some(PendingRequest::InviteCallRoom {
            call_id,
            connection_id,
        }) = self.context.take_request(request_id)
        else {
            warn!(request_id, "unmatched invite response");
            return;
        };
        let Ok(call) = self.call(call_id) else {
            return;
        };
        let mut guard = call.lock().await;
        match result {
            // ItemNotFound means the member is already in the room; both
            // outcomes complete the step.
            Ok(()) | Err(ServiceErrorCode::ItemNotFound) => {
                if let Some(connection) = guard.connection_mut(connection_id) {
                    connection.invited = true;
                    connection.ops.mark_done(ConnectionOperation::InviteCallRoom);
                }
            }
            Err(code) => {
                warn!(%call_id, ?code, "room invite failed");
            }
        }
    }

    /// A member joined a call room we are part of.
    pub async fn on_member_join_call_room(&self, room_id: CallRoomId, member: CallRoomMember) {
        let Some(call_id) = self.room_routes.get(&room_id).map(|e| *e.value()) else {
            debug!(%room_id, "member join for an unknown room");
            return;
        };
        let Ok(call) = self.call(call_id) else {
            return;
        };
        let mut guard = call.lock().await;
        guard.on_member_join(&member);
    }

    /// The call-room service reports a member finished transferring.
    pub async fn on_transfer_done(&self, room_id: CallRoomId, member_id: MemberId) {
        let Some(call_id) = self.room_routes.get(&room_id).map(|e| *e.value()) else {
            return;
        };
        let Ok(call) = self.call(call_id) else {
            return;
        };
        {
            let mut guard = call.lock().await;
            let outgoing = guard
                .connections
                .iter()
                .find(|c| c.member_id.as_ref() == Some(&member_id))
                .map(|c| c.id);
            if let Some(connection_id) = outgoing {
                guard
                    .remove_connection(&self.context, connection_id, TerminateReason::TransferDone)
                    .await;
            }
        }
        self.finalize_if_empty(&call, TerminateReason::TransferDone).await;
    }

    /// The signaling service reconnected; re-issue whatever failed offline.
    pub async fn on_service_reconnected(&self) {
        let calls: Vec<Arc<Mutex<CallState>>> =
            self.calls.iter().map(|e| Arc::clone(e.value())).collect();
        for call in calls {
            let mut guard = call.lock().await;
            if let Err(e) = guard.on_service_reconnected(&self.context).await {
                warn!(call_id = %guard.id, %e, "reconnect retry failed");
            }
        }
    }
}
