//! Streaming, descriptors and strict sideband decoding.

mod common;

use bytes::Bytes;
use common::{default_engine, TestEngine};
use meshcall_engine::wire::messages::{StreamingControlIq, StreamingInfoIq, StreamingOp};
use meshcall_engine::wire::IqMessage;
use meshcall_engine::{
    CallEvent, CallId, ConnectionState, EngineError, Originator, PeerId, SessionId,
    StreamingEventKind,
};

async fn connected_call(t: &TestEngine) -> (CallId, SessionId) {
    let session_id = SessionId::new();
    let call_id = t
        .engine
        .on_incoming_session(session_id, Originator::contact(PeerId::new()), false)
        .await
        .unwrap();
    t.engine.accept_call(call_id).await.unwrap();
    t.engine
        .on_connection_state_changed(session_id, ConnectionState::Connected)
        .await
        .unwrap();
    (call_id, session_id)
}

#[tokio::test]
async fn test_streaming_goes_to_capable_peers_only() {
    let t = default_engine().await;
    let (call_id, session_id) = connected_call(&t).await;

    // The peer has not advertised yet: capabilities unknown, no packet.
    t.engine.start_streaming(call_id).await.unwrap();
    assert!(t
        .peers
        .messages_for(session_id)
        .iter()
        .all(|m| !matches!(m, IqMessage::StreamingControl(_))));

    t.engine
        .on_peer_version(session_id, "meshcall:2.1.0:stream,transfer,message")
        .await
        .unwrap();
    t.engine.start_streaming(call_id).await.unwrap();
    assert!(t.peers.messages_for(session_id).iter().any(|m| matches!(
        m,
        IqMessage::StreamingControl(StreamingControlIq {
            op: StreamingOp::Start,
            ..
        })
    )));

    t.engine.stop_streaming(call_id).await.unwrap();
    assert!(t.peers.messages_for(session_id).iter().any(|m| matches!(
        m,
        IqMessage::StreamingControl(StreamingControlIq {
            op: StreamingOp::Stop,
            ..
        })
    )));
}

#[tokio::test]
async fn test_inbound_streaming_session_lifecycle_events() {
    let t = default_engine().await;
    let (_, session_id) = connected_call(&t).await;

    let control = |op: StreamingOp, position_ms: i64| {
        StreamingControlIq {
            request_id: 1,
            op,
            position_ms,
        }
        .encode()
    };
    t.engine
        .on_data_frame(session_id, control(StreamingOp::Start, 0))
        .await
        .unwrap();
    t.engine
        .on_data_frame(
            session_id,
            StreamingInfoIq {
                request_id: 2,
                title: Some("song".to_string()),
                duration_ms: 180_000,
                mime_type: Some("audio/mpeg".to_string()),
            }
            .encode(),
        )
        .await
        .unwrap();
    t.engine
        .on_data_frame(session_id, control(StreamingOp::Pause, 4_000))
        .await
        .unwrap();
    t.engine
        .on_data_frame(session_id, control(StreamingOp::Resume, 4_000))
        .await
        .unwrap();
    t.engine
        .on_data_frame(session_id, control(StreamingOp::Stop, 9_000))
        .await
        .unwrap();

    let events = t
        .events
        .wait_for("streaming stopped", |events| {
            events.iter().any(|e| {
                matches!(
                    e,
                    CallEvent::Streaming {
                        kind: StreamingEventKind::Stopped,
                        ..
                    }
                )
            })
        })
        .await;
    let kinds: Vec<&StreamingEventKind> = events
        .iter()
        .filter_map(|e| match e {
            CallEvent::Streaming { kind, .. } => Some(kind),
            _ => None,
        })
        .collect();
    assert!(matches!(kinds[0], StreamingEventKind::Started));
    assert!(matches!(
        kinds[1],
        StreamingEventKind::Info { duration_ms: 180_000, .. }
    ));
    assert!(matches!(kinds[2], StreamingEventKind::Paused));
    assert!(matches!(kinds[3], StreamingEventKind::Resumed));
    assert!(matches!(kinds[4], StreamingEventKind::Stopped));

    // The session is gone; stray controls are ignored.
    t.engine
        .on_data_frame(session_id, control(StreamingOp::Pause, 9_000))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_descriptors_target_advertised_capabilities() {
    let t = default_engine().await;
    let (call_id, session_id) = connected_call(&t).await;

    // geoloc was not advertised; message was.
    t.engine
        .on_peer_version(session_id, "meshcall:2.1.0:message")
        .await
        .unwrap();

    let targets = t
        .engine
        .send_message(call_id, "hello".to_string())
        .await
        .unwrap();
    assert_eq!(targets, vec![session_id]);
    let targets = t
        .engine
        .send_geolocation(call_id, 48.85, 2.35, None)
        .await
        .unwrap();
    assert!(targets.is_empty());

    let events = t
        .events
        .wait_for("descriptor events", |events| {
            events
                .iter()
                .any(|e| matches!(e, CallEvent::DescriptorPushed { .. }))
        })
        .await;
    assert!(events
        .iter()
        .any(|e| matches!(e, CallEvent::DescriptorPushed { .. })));

    // A second geolocation updates in place, a clear deletes.
    t.engine
        .send_geolocation(call_id, 48.86, 2.36, Some(30.0))
        .await
        .unwrap();
    t.engine.clear_geolocation(call_id).await.unwrap();
    t.events
        .wait_for("geolocation lifecycle", |events| {
            events
                .iter()
                .any(|e| matches!(e, CallEvent::DescriptorUpdated { .. }))
                && events
                    .iter()
                    .any(|e| matches!(e, CallEvent::DescriptorDeleted { .. }))
        })
        .await;
}

#[tokio::test]
async fn test_garbage_frame_is_a_loud_fault() {
    let t = default_engine().await;
    let (call_id, session_id) = connected_call(&t).await;

    let result = t
        .engine
        .on_data_frame(session_id, Bytes::from_static(&[0x01, 0x02, 0x03]))
        .await;
    assert!(matches!(result, Err(EngineError::Wire(_))));
    t.events
        .wait_for("decode fault surfaced", |events| {
            events.iter().any(|e| {
                matches!(e, CallEvent::Error { call_id: Some(c), .. } if *c == call_id)
            })
        })
        .await;
    // The call itself survives a bad frame.
    assert!(t.engine.call_status(call_id).await.is_ok());
}

#[tokio::test]
async fn test_frame_on_unknown_session_is_not_routed() {
    let t = default_engine().await;
    connected_call(&t).await;
    let result = t
        .engine
        .on_data_frame(SessionId::new(), Bytes::from_static(&[0x00]))
        .await;
    assert!(matches!(result, Err(EngineError::SessionNotRouted { .. })));
}
