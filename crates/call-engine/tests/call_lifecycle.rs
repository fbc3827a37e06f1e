//! End-to-end call lifecycle through the orchestrator with mocked services.

mod common;

use std::time::Duration;

use common::{default_engine, start_engine};
use meshcall_engine::{
    CallConfig, CallEvent, CallStatus, ConnectionState, EngineError, Originator, PeerId,
    SessionId, TerminateReason,
};

#[tokio::test]
async fn test_incoming_call_accept_to_in_call() {
    let t = default_engine().await;
    let session_id = SessionId::new();
    let originator = Originator::contact(PeerId::new());

    let call_id = t
        .engine
        .on_incoming_session(session_id, originator.clone(), false)
        .await
        .unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::IncomingBell
    );
    t.events
        .wait_for("incoming call event", |events| {
            events
                .iter()
                .any(|e| matches!(e, CallEvent::IncomingCall { call_id: c, .. } if *c == call_id))
        })
        .await;

    t.engine.accept_call(call_id).await.unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::AcceptedIncomingCall
    );
    assert_eq!(t.peers.accepted.lock().unwrap().len(), 1);
    assert_eq!(t.signaling.accepts.lock().unwrap().len(), 1);

    t.engine
        .on_connection_state_changed(session_id, ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::InCall
    );

    t.engine
        .terminate_call(call_id, TerminateReason::Success)
        .await
        .unwrap();
    let events = t
        .events
        .wait_for("terminated event", |events| {
            events
                .iter()
                .any(|e| matches!(e, CallEvent::CallTerminated { .. }))
        })
        .await;
    assert!(events.iter().any(|e| matches!(
        e,
        CallEvent::CallTerminated {
            reason: TerminateReason::Success,
            missed: false,
            ..
        }
    )));
    assert_eq!(
        t.peers.terminated_with(session_id),
        Some(TerminateReason::Success)
    );
}

#[tokio::test]
async fn test_outgoing_call_progression() {
    let t = default_engine().await;
    let peer = PeerId::new();

    let call_id = t
        .engine
        .place_call(Originator::contact(peer), true)
        .await
        .unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::OutgoingVideoCall
    );
    let session_id = t.peers.last_created_session();
    let request_id = t.signaling.last_start_request();

    t.engine.on_start_call_response(request_id, Ok(())).await;
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::OutgoingVideoBell
    );

    t.engine.on_peer_accepted(session_id).await.unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::AcceptedOutgoingVideoCall
    );

    t.engine
        .on_connection_state_changed(session_id, ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::InVideoCall
    );
    assert_eq!(t.engine.active_call_id().await, Some(call_id));
}

#[tokio::test]
async fn test_unrelated_incoming_offer_is_rejected_busy() {
    let t = default_engine().await;
    let first_session = SessionId::new();
    t.engine
        .on_incoming_session(first_session, Originator::contact(PeerId::new()), false)
        .await
        .unwrap();

    let second_session = SessionId::new();
    let result = t
        .engine
        .on_incoming_session(second_session, Originator::contact(PeerId::new()), false)
        .await;
    assert!(matches!(result, Err(EngineError::Busy)));
    assert_eq!(
        t.peers.terminated_with(second_session),
        Some(TerminateReason::Busy)
    );
}

#[tokio::test]
async fn test_unanswered_incoming_call_times_out_as_missed() {
    let t = start_engine(
        CallConfig::new()
            .with_incoming_ring_timeout(Duration::from_millis(50))
            .with_shutdown_grace(Duration::from_millis(50)),
    )
    .await;
    let session_id = SessionId::new();
    let call_id = t
        .engine
        .on_incoming_session(session_id, Originator::contact(PeerId::new()), false)
        .await
        .unwrap();

    let events = t
        .events
        .wait_for("timeout termination", |events| {
            events
                .iter()
                .any(|e| matches!(e, CallEvent::CallTerminated { call_id: c, .. } if *c == call_id))
        })
        .await;
    assert!(events.iter().any(|e| matches!(
        e,
        CallEvent::CallTerminated {
            reason: TerminateReason::Timeout,
            missed: true,
            ..
        }
    )));
    assert_eq!(
        t.peers.terminated_with(session_id),
        Some(TerminateReason::Timeout)
    );
}

#[tokio::test]
async fn test_connection_failure_terminates_the_call() {
    let t = default_engine().await;
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

    t.engine
        .on_connection_state_changed(session_id, ConnectionState::Failed)
        .await
        .unwrap();
    let events = t
        .events
        .wait_for("connectivity termination", |events| {
            events
                .iter()
                .any(|e| matches!(e, CallEvent::CallTerminated { call_id: c, .. } if *c == call_id))
        })
        .await;
    // The media path was reached, so a later drop is not a missed call.
    assert!(events.iter().any(|e| matches!(
        e,
        CallEvent::CallTerminated {
            reason: TerminateReason::ConnectivityError,
            missed: false,
            ..
        }
    )));
}

#[tokio::test]
async fn test_auto_answer_accepts_without_ringing() {
    let t = default_engine().await;
    t.identities.set_auto_answer(true);
    let session_id = SessionId::new();
    let call_id = t
        .engine
        .on_incoming_session(session_id, Originator::contact(PeerId::new()), false)
        .await
        .unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::AcceptedIncomingCall
    );
    assert_eq!(t.signaling.accepts.lock().unwrap().len(), 1);
}
