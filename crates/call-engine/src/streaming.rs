//! Media streaming side-channel session.
//!
//! At most one streaming session exists per call; starting a new one
//! replaces (stops, without notifying) the previous one. The session here
//! is pure bookkeeping driving the Streaming* wire family; actual media
//! bytes pass through opaquely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meshcall_wire::messages::StreamingOp;

/// Playback state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingState {
    /// Started, no data flowing yet
    Starting,
    /// Data flowing
    Playing,
    /// Paused by either side
    Paused,
    /// Stopped; terminal
    Stopped,
}

/// One streaming session within a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingSession {
    /// Playback state
    pub state: StreamingState,
    /// Track title, when known
    pub title: Option<String>,
    /// Track MIME type, when known
    pub mime_type: Option<String>,
    /// Track duration in milliseconds, 0 when unknown
    pub duration_ms: i64,
    /// Last known playback position in milliseconds
    pub position_ms: i64,
    /// When the session started
    pub started_at: DateTime<Utc>,
}

impl StreamingSession {
    /// Fresh session in the Starting state.
    pub fn new() -> Self {
        Self {
            state: StreamingState::Starting,
            title: None,
            mime_type: None,
            duration_ms: 0,
            position_ms: 0,
            started_at: Utc::now(),
        }
    }

    /// Apply a streaming control operation. Returns true when the state or
    /// position changed; a stopped session ignores everything.
    pub fn apply_control(&mut self, op: StreamingOp, position_ms: i64) -> bool {
        if self.state == StreamingState::Stopped {
            return false;
        }
        match op {
            StreamingOp::Start => {
                self.position_ms = position_ms;
                self.state = StreamingState::Playing;
            }
            StreamingOp::Pause => {
                if self.state == StreamingState::Paused {
                    return false;
                }
                self.position_ms = position_ms;
                self.state = StreamingState::Paused;
            }
            StreamingOp::Resume => {
                if self.state == StreamingState::Playing {
                    return false;
                }
                self.state = StreamingState::Playing;
            }
            StreamingOp::Stop => {
                self.position_ms = position_ms;
                self.state = StreamingState::Stopped;
            }
            StreamingOp::Seek => {
                self.position_ms = position_ms;
            }
        }
        true
    }

    /// Record track information.
    pub fn apply_info(&mut self, title: Option<String>, duration_ms: i64, mime_type: Option<String>) {
        self.title = title;
        self.duration_ms = duration_ms;
        self.mime_type = mime_type;
    }

    /// Stop the session.
    pub fn stop(&mut self) {
        self.state = StreamingState::Stopped;
    }

    /// Whether the session reached its terminal state.
    pub fn is_stopped(&self) -> bool {
        self.state == StreamingState::Stopped
    }
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}
