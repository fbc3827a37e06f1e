//! Shared mocks and harness for the engine integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use meshcall_engine::wire::IqMessage;
use meshcall_engine::{
    CallConfig, CallEvent, CallEventHandler, CallOrchestrator, CallRoomId, CallRoomService,
    CameraFacing, CameraInfo, IdentityResolver, MemberId, Originator, PeerConnectionService,
    PeerId, ResolvedIdentity, ServiceResult, SessionId, SignalingService, TerminateReason,
};

/// Signaling mock that records every request with its correlation id.
#[derive(Default)]
pub struct MockSignaling {
    pub starts: Mutex<Vec<(i64, PeerId, bool)>>,
    pub accepts: Mutex<Vec<(i64, SessionId, bool)>>,
    pub terminates: Mutex<Vec<(i64, SessionId, TerminateReason)>>,
}

impl MockSignaling {
    pub fn last_start_request(&self) -> i64 {
        self.starts.lock().unwrap().last().expect("no start request").0
    }
}

#[async_trait]
impl SignalingService for MockSignaling {
    async fn start_call(&self, request_id: i64, peer_id: PeerId, video: bool) -> ServiceResult<()> {
        self.starts.lock().unwrap().push((request_id, peer_id, video));
        Ok(())
    }

    async fn accept_call(
        &self,
        request_id: i64,
        session_id: SessionId,
        video: bool,
    ) -> ServiceResult<()> {
        self.accepts.lock().unwrap().push((request_id, session_id, video));
        Ok(())
    }

    async fn terminate_call(
        &self,
        request_id: i64,
        session_id: SessionId,
        reason: TerminateReason,
    ) -> ServiceResult<()> {
        self.terminates
            .lock()
            .unwrap()
            .push((request_id, session_id, reason));
        Ok(())
    }
}

/// Media transport mock. Sessions are fabricated on demand; frames are
/// retained so tests can decode what went over the sideband.
pub struct MockPeerConnections {
    pub created: Mutex<Vec<SessionId>>,
    pub accepted: Mutex<Vec<(SessionId, bool)>>,
    pub terminated: Mutex<Vec<(SessionId, TerminateReason)>>,
    pub frames: Mutex<Vec<(SessionId, Bytes)>>,
    pub audio_directions: Mutex<Vec<(SessionId, bool)>>,
    pub camera_switches: Mutex<Vec<CameraFacing>>,
    pub camera: CameraInfo,
}

impl Default for MockPeerConnections {
    fn default() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            audio_directions: Mutex::new(Vec::new()),
            camera_switches: Mutex::new(Vec::new()),
            camera: CameraInfo {
                camera_bitmap: 0x03,
                active_camera: 0,
                min_zoom: 1.0,
                max_zoom: 8.0,
            },
        }
    }
}

impl MockPeerConnections {
    pub fn last_created_session(&self) -> SessionId {
        *self.created.lock().unwrap().last().expect("no session created")
    }

    pub fn created_sessions(&self) -> Vec<SessionId> {
        self.created.lock().unwrap().clone()
    }

    /// Decode every frame sent on a session, in order.
    pub fn messages_for(&self, session_id: SessionId) -> Vec<IqMessage> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == session_id)
            .map(|(_, frame)| IqMessage::decode(frame.clone()).expect("mock got a bad frame"))
            .collect()
    }

    pub fn terminated_with(&self, session_id: SessionId) -> Option<TerminateReason> {
        self.terminated
            .lock()
            .unwrap()
            .iter()
            .find(|(s, _)| *s == session_id)
            .map(|(_, reason)| *reason)
    }
}

#[async_trait]
impl PeerConnectionService for MockPeerConnections {
    async fn create_outgoing_session(
        &self,
        _peer_id: PeerId,
        _video: bool,
    ) -> ServiceResult<SessionId> {
        let session_id = SessionId::new();
        self.created.lock().unwrap().push(session_id);
        Ok(session_id)
    }

    async fn accept_session(&self, session_id: SessionId, video: bool) -> ServiceResult<()> {
        self.accepted.lock().unwrap().push((session_id, video));
        Ok(())
    }

    async fn terminate_session(
        &self,
        session_id: SessionId,
        reason: TerminateReason,
    ) -> ServiceResult<()> {
        self.terminated.lock().unwrap().push((session_id, reason));
        Ok(())
    }

    async fn send_frame(&self, session_id: SessionId, frame: Bytes) -> ServiceResult<()> {
        self.frames.lock().unwrap().push((session_id, frame));
        Ok(())
    }

    async fn set_audio_direction(&self, session_id: SessionId, send: bool) -> ServiceResult<()> {
        self.audio_directions.lock().unwrap().push((session_id, send));
        Ok(())
    }

    async fn set_video_direction(&self, _session_id: SessionId, _send: bool) -> ServiceResult<()> {
        Ok(())
    }

    async fn switch_camera(&self, facing: CameraFacing) -> ServiceResult<()> {
        self.camera_switches.lock().unwrap().push(facing);
        Ok(())
    }

    async fn select_camera(&self, _camera: i32) -> ServiceResult<()> {
        Ok(())
    }

    async fn set_zoom(&self, _scale: f64) -> ServiceResult<()> {
        Ok(())
    }

    async fn set_camera_mute(&self, _muted: bool) -> ServiceResult<()> {
        Ok(())
    }

    async fn local_camera_info(&self) -> ServiceResult<CameraInfo> {
        Ok(self.camera)
    }

    async fn attach_renderer(&self, _session_id: SessionId, _track_id: &str) -> ServiceResult<()> {
        Ok(())
    }

    async fn release_renderer(&self, _session_id: SessionId) -> ServiceResult<()> {
        Ok(())
    }
}

/// Call-room service mock.
#[derive(Default)]
pub struct MockCallRooms {
    pub creates: Mutex<Vec<(i64, Vec<(PeerId, Option<SessionId>)>, usize)>>,
    pub joins: Mutex<Vec<(i64, CallRoomId, Vec<(PeerId, SessionId)>)>>,
    pub invites: Mutex<Vec<(i64, CallRoomId, PeerId, SessionId)>>,
    pub leaves: Mutex<Vec<(CallRoomId, MemberId)>>,
}

impl MockCallRooms {
    pub fn last_create_request(&self) -> i64 {
        self.creates.lock().unwrap().last().expect("no create request").0
    }

    pub fn last_join_request(&self) -> i64 {
        self.joins.lock().unwrap().last().expect("no join request").0
    }

    pub fn last_invite_request(&self) -> i64 {
        self.invites.lock().unwrap().last().expect("no invite request").0
    }
}

#[async_trait]
impl CallRoomService for MockCallRooms {
    async fn create_call_room(
        &self,
        request_id: i64,
        members: Vec<(PeerId, Option<SessionId>)>,
        max_members: usize,
    ) -> ServiceResult<()> {
        self.creates
            .lock()
            .unwrap()
            .push((request_id, members, max_members));
        Ok(())
    }

    async fn join_call_room(
        &self,
        request_id: i64,
        room_id: CallRoomId,
        known_sessions: Vec<(PeerId, SessionId)>,
    ) -> ServiceResult<()> {
        self.joins
            .lock()
            .unwrap()
            .push((request_id, room_id, known_sessions));
        Ok(())
    }

    async fn invite_call_room(
        &self,
        request_id: i64,
        room_id: CallRoomId,
        peer_id: PeerId,
        session_id: SessionId,
    ) -> ServiceResult<()> {
        self.invites
            .lock()
            .unwrap()
            .push((request_id, room_id, peer_id, session_id));
        Ok(())
    }

    async fn leave_call_room(
        &self,
        room_id: CallRoomId,
        member_id: MemberId,
    ) -> ServiceResult<()> {
        self.leaves.lock().unwrap().push((room_id, member_id));
        Ok(())
    }
}

/// Identity resolver mock with a configurable answer.
pub struct MockIdentities {
    pub identity: Mutex<ResolvedIdentity>,
}

impl Default for MockIdentities {
    fn default() -> Self {
        Self {
            identity: Mutex::new(ResolvedIdentity {
                name: "Peer".to_string(),
                description: None,
                avatar: None,
                auto_answer: false,
                transfer_allowed: false,
            }),
        }
    }
}

impl MockIdentities {
    pub fn set_transfer_allowed(&self, allowed: bool) {
        self.identity.lock().unwrap().transfer_allowed = allowed;
    }

    pub fn set_auto_answer(&self, auto: bool) {
        self.identity.lock().unwrap().auto_answer = auto;
    }
}

#[async_trait]
impl IdentityResolver for MockIdentities {
    async fn resolve(&self, _originator: &Originator) -> ServiceResult<ResolvedIdentity> {
        Ok(self.identity.lock().unwrap().clone())
    }
}

/// Collects every emitted event for later inspection.
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<CallEvent>>,
}

impl EventCollector {
    pub fn snapshot(&self) -> Vec<CallEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Poll until the collected events satisfy a predicate, then return the
    /// snapshot. Panics after two seconds.
    pub async fn wait_for<F>(&self, what: &str, predicate: F) -> Vec<CallEvent>
    where
        F: Fn(&[CallEvent]) -> bool,
    {
        for _ in 0..200 {
            {
                let events = self.events.lock().unwrap();
                if predicate(&events) {
                    return events.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}: {:?}", self.snapshot());
    }
}

#[async_trait]
impl CallEventHandler for EventCollector {
    async fn on_event(&self, event: CallEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A started engine with all four mocks and an event collector wired in.
pub struct TestEngine {
    pub engine: Arc<CallOrchestrator>,
    pub signaling: Arc<MockSignaling>,
    pub peers: Arc<MockPeerConnections>,
    pub rooms: Arc<MockCallRooms>,
    pub identities: Arc<MockIdentities>,
    pub events: Arc<EventCollector>,
}

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("meshcall_engine=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub async fn start_engine(config: CallConfig) -> TestEngine {
    init_logging();
    let signaling = Arc::new(MockSignaling::default());
    let peers = Arc::new(MockPeerConnections::default());
    let rooms = Arc::new(MockCallRooms::default());
    let identities = Arc::new(MockIdentities::default());
    let events = Arc::new(EventCollector::default());
    let engine = CallOrchestrator::new(
        config,
        signaling.clone(),
        peers.clone(),
        rooms.clone(),
        identities.clone(),
    )
    .expect("engine construction");
    engine
        .add_event_handler("collector", events.clone())
        .await;
    engine.start().await.expect("engine start");
    TestEngine {
        engine,
        signaling,
        peers,
        rooms,
        identities,
        events,
    }
}

pub async fn default_engine() -> TestEngine {
    start_engine(CallConfig::new().with_shutdown_grace(Duration::from_millis(50))).await
}
