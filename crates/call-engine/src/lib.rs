//! # meshcall-engine
//!
//! Call-session control plane for peer-to-peer audio/video calls.
//!
//! The engine owns the call state machines of a messenger-style client:
//! one-to-one calls, meshed group calls coordinated through server-side
//! call rooms, device transfer, remote camera control, in-call streaming
//! and the descriptor log. It never touches media or signaling transports
//! itself; the host wires those in through the service traits and feeds
//! transport callbacks into the [`CallOrchestrator`].
//!
//! ## Architecture
//!
//! ```text
//! host application
//!      |  place_call / accept_call / on_data_frame / on_* callbacks
//!      v
//! CallOrchestrator          slots, routing, request correlation
//!      |
//!      v
//! CallState (one lock)      aggregation, rooms, transfer, streaming
//!      |
//!      v
//! CallConnection            per-leg status, capabilities, sideband
//! ```
//!
//! Each call is a single `tokio::sync::Mutex` domain; connections never
//! perform I/O and instead return signals the call layer acts on. Events
//! flow one way, out of the engine over a channel, fanned out to the
//! registered [`CallEventHandler`]s.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use meshcall_engine::{CallConfig, CallOrchestrator};
//! # async fn example(
//! #     signaling: Arc<dyn meshcall_engine::SignalingService>,
//! #     peers: Arc<dyn meshcall_engine::PeerConnectionService>,
//! #     rooms: Arc<dyn meshcall_engine::CallRoomService>,
//! #     identities: Arc<dyn meshcall_engine::IdentityResolver>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CallOrchestrator::new(
//!     CallConfig::new().with_product_name("meshcall"),
//!     signaling,
//!     peers,
//!     rooms,
//!     identities,
//! )?;
//! engine.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod capabilities;
pub mod config;
pub mod connection;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod ops;
pub mod orchestrator;
pub mod participant;
pub mod service;
pub mod streaming;
pub mod timer;
pub mod types;

pub use call::{CallRoom, CallState, TransferState};
pub use capabilities::{CapabilitySupport, PeerCapabilities, ZoomPolicy};
pub use config::CallConfig;
pub use connection::{CallConnection, ConnectionSignal};
pub use error::{EngineError, EngineResult};
pub use events::{
    CallEvent, CallEventHandler, KeyCheckEventKind, ParticipantEventKind, StreamingEventKind,
};
pub use orchestrator::{CallOrchestrator, CallStats};
pub use participant::CallParticipant;
pub use service::{
    CallRoomJoinInfo, CallRoomMember, CallRoomService, CameraInfo, IdentityResolver,
    MemberStatus, PeerConnectionService, ResolvedIdentity, ServiceErrorCode, ServiceResult,
    SignalingService,
};
pub use types::{
    CallDirection, CallId, CallRoomId, CallStatus, CameraFacing, ConnectionId, ConnectionState,
    MemberId, Originator, PeerId, SessionId, TerminateReason, TransferDirection,
};

/// Re-export of the sideband wire protocol.
pub use meshcall_wire as wire;
