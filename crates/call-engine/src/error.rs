//! Error types for the call engine.

use crate::service::ServiceErrorCode;
use crate::types::{CallId, ConnectionId, SessionId};

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the call engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// No call exists with the given id
    #[error("call {call_id} not found")]
    CallNotFound {
        /// The unknown call id
        call_id: CallId,
    },

    /// No connection exists with the given id
    #[error("connection {connection_id} not found")]
    ConnectionNotFound {
        /// The unknown connection id
        connection_id: ConnectionId,
    },

    /// No route exists for the given transport session
    #[error("session {session_id} not routed")]
    SessionNotRouted {
        /// The unknown session id
        session_id: SessionId,
    },

    /// Both call slots are occupied
    #[error("busy: active and held call slots are occupied")]
    Busy,

    /// The orchestrator has not been started
    #[error("engine is not started")]
    NotStarted,

    /// Operation attempted in a state that does not allow it
    #[error("invalid state: {message}")]
    InvalidState {
        /// What was inconsistent
        message: String,
    },

    /// Configuration rejected by validation
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// What was rejected
        message: String,
    },

    /// A sideband frame failed to decode
    #[error("wire fault: {0}")]
    Wire(#[from] meshcall_wire::WireError),

    /// An external service reported an error
    #[error("service error: {code:?}")]
    Service {
        /// The reported error code
        code: ServiceErrorCode,
    },

    /// Anything unclassified
    #[error("internal error: {message}")]
    InternalError {
        /// Diagnostic detail
        message: String,
    },
}

impl EngineError {
    /// Shorthand for an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        EngineError::InvalidState {
            message: message.into(),
        }
    }
}

impl From<ServiceErrorCode> for EngineError {
    fn from(code: ServiceErrorCode) -> Self {
        EngineError::Service { code }
    }
}
