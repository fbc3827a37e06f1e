//! Idempotency guards for coordination steps.
//!
//! Several coordination steps (create the call room, join it, create the
//! outgoing peer connection, ...) can be triggered more than once: once on
//! the direct path and again on an online-reconnect re-scan, or from two
//! racing callbacks. Each aggregate carries an [`OperationSet`] so that a
//! side-effecting step executes at most once, and so the completion of its
//! asynchronous part can be recorded separately.
//!
//! `check` is test-and-set under the owning aggregate's lock: the first
//! caller gets `true` and performs the step, every later caller gets
//! `false`.

use std::marker::PhantomData;

/// A coordination step that can be tracked by an [`OperationSet`].
pub trait Operation: Copy {
    /// Stable bit position for this step.
    fn bit(self) -> u32;
}

/// Call-level coordination steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOperation {
    /// Create the shared call room
    CreateCallRoom,
    /// Join an existing call room
    JoinCallRoom,
    /// Invite members into the call room
    InviteCallRoom,
    /// Issue the initial start-call signaling request
    StartCall,
    /// Issue the accept-call signaling request
    AcceptCall,
    /// Issue the terminate-call signaling request
    TerminateCall,
}

impl Operation for CallOperation {
    fn bit(self) -> u32 {
        match self {
            CallOperation::CreateCallRoom => 0,
            CallOperation::JoinCallRoom => 1,
            CallOperation::InviteCallRoom => 2,
            CallOperation::StartCall => 3,
            CallOperation::AcceptCall => 4,
            CallOperation::TerminateCall => 5,
        }
    }
}

/// Connection-level coordination steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOperation {
    /// Accept an incoming peer connection with the transport
    CreateIncomingPeerConnection,
    /// Create an outgoing peer connection with the transport
    CreateOutgoingPeerConnection,
    /// Create the call room on behalf of this connection
    CreateCallRoom,
    /// Join the call room on behalf of this connection
    JoinCallRoom,
    /// Send the call-room invite for this connection's peer
    InviteCallRoom,
}

impl Operation for ConnectionOperation {
    fn bit(self) -> u32 {
        match self {
            ConnectionOperation::CreateIncomingPeerConnection => 0,
            ConnectionOperation::CreateOutgoingPeerConnection => 1,
            ConnectionOperation::CreateCallRoom => 2,
            ConnectionOperation::JoinCallRoom => 3,
            ConnectionOperation::InviteCallRoom => 4,
        }
    }
}

/// Typed started/done tracker for the coordination steps of one aggregate.
#[derive(Debug, Default, Clone)]
pub struct OperationSet<T: Operation> {
    started: u32,
    done: u32,
    _marker: PhantomData<T>,
}

impl<T: Operation> OperationSet<T> {
    /// Empty tracker: no step started, none done.
    pub fn new() -> Self {
        Self {
            started: 0,
            done: 0,
            _marker: PhantomData,
        }
    }

    /// Test-and-set: returns `true` exactly once per step. The caller that
    /// receives `true` performs the step; everyone else skips it.
    pub fn check(&mut self, op: T) -> bool {
        let mask = 1u32 << op.bit();
        if self.started & mask != 0 {
            return false;
        }
        self.started |= mask;
        true
    }

    /// Whether the step was started (its `check` already consumed).
    pub fn is_started(&self, op: T) -> bool {
        self.started & (1u32 << op.bit()) != 0
    }

    /// Record completion of the step's asynchronous part. Marks the step
    /// started as well, for callers recording externally-completed work.
    pub fn mark_done(&mut self, op: T) {
        let mask = 1u32 << op.bit();
        self.started |= mask;
        self.done |= mask;
    }

    /// Whether the step's asynchronous part completed.
    pub fn is_done(&self, op: T) -> bool {
        self.done & (1u32 << op.bit()) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_is_test_and_set() {
        let mut ops = OperationSet::new();
        assert!(ops.check(CallOperation::CreateCallRoom));
        assert!(!ops.check(CallOperation::CreateCallRoom));
        assert!(!ops.check(CallOperation::CreateCallRoom));
        // Other steps are unaffected.
        assert!(ops.check(CallOperation::StartCall));
    }

    #[test]
    fn test_done_requires_explicit_mark() {
        let mut ops = OperationSet::new();
        assert!(ops.check(ConnectionOperation::CreateOutgoingPeerConnection));
        assert!(!ops.is_done(ConnectionOperation::CreateOutgoingPeerConnection));
        ops.mark_done(ConnectionOperation::CreateOutgoingPeerConnection);
        assert!(ops.is_done(ConnectionOperation::CreateOutgoingPeerConnection));
        assert!(ops.is_started(ConnectionOperation::CreateOutgoingPeerConnection));
    }

    #[test]
    fn test_mark_done_implies_started() {
        let mut ops = OperationSet::new();
        ops.mark_done(CallOperation::JoinCallRoom);
        assert!(ops.is_started(CallOperation::JoinCallRoom));
        // The step was completed elsewhere; check must not hand it out again.
        assert!(!ops.check(CallOperation::JoinCallRoom));
    }
}
