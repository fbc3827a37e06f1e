//! Shared engine context.
//!
//! Everything a state machine needs to do its work without calling back
//! into the orchestrator: the external services, the event channel, the
//! internal command channel, the request-id allocator and the pending
//! request table. One `Arc<EngineContext>` is shared by the orchestrator
//! and every call.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::CallConfig;
use crate::events::CallEvent;
use crate::service::{
    CallRoomService, IdentityResolver, PeerConnectionService, SignalingService,
};
use crate::types::{CallId, ConnectionId};

/// A request issued to an external service, awaiting its callback.
///
/// The callback removes the entry by request id and resumes the matching
/// state-machine step. Entries are otherwise drained when their call
/// terminates, so an abandoned request cannot outlive its call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRequest {
    /// Outgoing call offer in flight
    StartCall {
        /// The calling call
        call_id: CallId,
        /// The connection being established
        connection_id: ConnectionId,
    },
    /// Accept of an incoming offer in flight
    AcceptCall {
        /// The accepting call
        call_id: CallId,
        /// The accepted connection
        connection_id: ConnectionId,
    },
    /// Terminate request in flight
    TerminateCall {
        /// The terminating call
        call_id: CallId,
        /// The terminated connection
        connection_id: ConnectionId,
    },
    /// Call-room creation in flight
    CreateCallRoom {
        /// The group call
        call_id: CallId,
    },
    /// Call-room join in flight
    JoinCallRoom {
        /// The joining call
        call_id: CallId,
    },
    /// Call-room invite in flight
    InviteCallRoom {
        /// The inviting call
        call_id: CallId,
        /// The invited peer's connection
        connection_id: ConnectionId,
    },
}

impl PendingRequest {
    /// The call this request belongs to.
    pub fn call_id(&self) -> CallId {
        match *self {
            PendingRequest::StartCall { call_id, .. }
            | PendingRequest::AcceptCall { call_id, .. }
            | PendingRequest::TerminateCall { call_id, .. }
            | PendingRequest::CreateCallRoom { call_id }
            | PendingRequest::JoinCallRoom { call_id }
            | PendingRequest::InviteCallRoom { call_id, .. } => call_id,
        }
    }
}

/// Internal commands fed back into the orchestrator's command loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// A connection's timer fired
    ConnectionTimerExpired {
        /// The timer's call
        call_id: CallId,
        /// The timer's connection
        connection_id: ConnectionId,
    },
    /// The post-termination grace period of a call elapsed
    ReleaseCall {
        /// The call to release
        call_id: CallId,
    },
}

/// Shared state and collaborators for the whole engine.
pub struct EngineContext {
    /// Validated engine configuration
    pub config: CallConfig,
    /// Conversation-level signaling
    pub signaling: Arc<dyn SignalingService>,
    /// Media transport
    pub peer_connections: Arc<dyn PeerConnectionService>,
    /// Call-room coordination
    pub call_rooms: Arc<dyn CallRoomService>,
    /// Originator identity resolution
    pub identities: Arc<dyn IdentityResolver>,
    event_tx: mpsc::UnboundedSender<CallEvent>,
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    next_request_id: AtomicI64,
    pending_requests: DashMap<i64, PendingRequest>,
}

impl EngineContext {
    /// Build the context around the host-provided services.
    pub fn new(
        config: CallConfig,
        signaling: Arc<dyn SignalingService>,
        peer_connections: Arc<dyn PeerConnectionService>,
        call_rooms: Arc<dyn CallRoomService>,
        identities: Arc<dyn IdentityResolver>,
        event_tx: mpsc::UnboundedSender<CallEvent>,
        command_tx: mpsc::UnboundedSender<EngineCommand>,
    ) -> Self {
        Self {
            config,
            signaling,
            peer_connections,
            call_rooms,
            identities,
            event_tx,
            command_tx,
            next_request_id: AtomicI64::new(1),
            pending_requests: DashMap::new(),
        }
    }

    /// Allocate a locally-unique request id.
    pub fn next_request_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate a request id and record the pending operation behind it.
    pub fn register_request(&self, pending: PendingRequest) -> i64 {
        let request_id = self.next_request_id();
        self.pending_requests.insert(request_id, pending);
        request_id
    }

    /// Remove and return the operation behind a request id.
    pub fn take_request(&self, request_id: i64) -> Option<PendingRequest> {
        self.pending_requests
            .remove(&request_id)
            .map(|(_, pending)| pending)
    }

    /// Drop every pending request belonging to a terminated call.
    pub fn drain_requests_for_call(&self, call_id: CallId) {
        self.pending_requests
            .retain(|_, pending| pending.call_id() != call_id);
    }

    /// Number of requests still awaiting a callback.
    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Emit one event towards the registered handlers.
    pub fn emit(&self, event: CallEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("event channel closed, dropping engine event");
        }
    }

    /// Feed a command back into the orchestrator's loop.
    pub fn send_command(&self, command: EngineCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("command channel closed, dropping {:?}", command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_request_lifecycle() {
        let table: DashMap<i64, PendingRequest> = DashMap::new();
        let call_id = CallId::new();
        let other = CallId::new();
        table.insert(1, PendingRequest::CreateCallRoom { call_id });
        table.insert(
            2,
            PendingRequest::StartCall {
                call_id: other,
                connection_id: ConnectionId::new(),
            },
        );
        table.retain(|_, pending| pending.call_id() != call_id);
        assert!(!table.contains_key(&1));
        assert!(table.contains_key(&2));
    }
}
