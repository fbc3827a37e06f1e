//! Two-call handling: hold, switch and merge.

mod common;

use common::{default_engine, TestEngine};
use meshcall_engine::wire::IqMessage;
use meshcall_engine::{
    CallEvent, CallId, CallStatus, ConnectionState, EngineError, Originator, PeerId, SessionId,
    TerminateReason,
};

/// Bring one incoming call up to the media path.
async fn connected_incoming_call(t: &TestEngine) -> (CallId, SessionId) {
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

/// Place an outgoing call and drive it to the media path.
async fn connected_outgoing_call(t: &TestEngine) -> (CallId, SessionId) {
    let call_id = t
        .engine
        .place_call(Originator::contact(PeerId::new()), false)
        .await
        .unwrap();
    let session_id = t.peers.last_created_session();
    let request_id = t.signaling.last_start_request();
    t.engine.on_start_call_response(request_id, Ok(())).await;
    t.engine.on_peer_accepted(session_id).await.unwrap();
    t.engine
        .on_connection_state_changed(session_id, ConnectionState::Connected)
        .await
        .unwrap();
    (call_id, session_id)
}

#[tokio::test]
async fn test_hold_and_resume_notify_the_peer() {
    let t = default_engine().await;
    let (call_id, session_id) = connected_incoming_call(&t).await;

    t.engine.hold_call(call_id).await.unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::OnHold
    );
    assert!(t
        .peers
        .messages_for(session_id)
        .iter()
        .any(|m| matches!(m, IqMessage::HoldCall(_))));
    assert!(t
        .peers
        .audio_directions
        .lock()
        .unwrap()
        .contains(&(session_id, false)));

    t.engine.resume_call(call_id).await.unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::InCall
    );
    assert!(t
        .peers
        .messages_for(session_id)
        .iter()
        .any(|m| matches!(m, IqMessage::ResumeCall(_))));
}

#[tokio::test]
async fn test_resuming_an_unanswered_call_keeps_it_ringing() {
    let t = default_engine().await;
    let session_id = SessionId::new();
    let call_id = t
        .engine
        .on_incoming_session(session_id, Originator::contact(PeerId::new()), false)
        .await
        .unwrap();

    // Held while still ringing, e.g. because the user dials out mid-ring.
    t.engine.hold_call(call_id).await.unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::OnHold
    );
    // Resuming brings the ring back; it must not look accepted.
    t.engine.resume_call(call_id).await.unwrap();
    assert_eq!(
        t.engine.call_status(call_id).await.unwrap(),
        CallStatus::IncomingBell
    );
}

#[tokio::test]
async fn test_placing_a_second_call_holds_the_first() {
    let t = default_engine().await;
    let (first_call, first_session) = connected_incoming_call(&t).await;

    let (second_call, _) = connected_outgoing_call(&t).await;
    assert_eq!(t.engine.active_call_id().await, Some(second_call));
    assert_eq!(t.engine.held_call_id().await, Some(first_call));
    assert_eq!(
        t.engine.call_status(first_call).await.unwrap(),
        CallStatus::OnHold
    );
    assert!(t
        .peers
        .messages_for(first_session)
        .iter()
        .any(|m| matches!(m, IqMessage::HoldCall(_))));
}

#[tokio::test]
async fn test_third_call_is_busy() {
    let t = default_engine().await;
    connected_incoming_call(&t).await;
    connected_outgoing_call(&t).await;
    let result = t
        .engine
        .place_call(Originator::contact(PeerId::new()), false)
        .await;
    assert!(matches!(result, Err(EngineError::Busy)));
}

#[tokio::test]
async fn test_switch_swaps_active_and_held() {
    let t = default_engine().await;
    let (first_call, first_session) = connected_incoming_call(&t).await;
    let (second_call, second_session) = connected_outgoing_call(&t).await;

    t.engine.switch_calls().await.unwrap();
    assert_eq!(t.engine.active_call_id().await, Some(first_call));
    assert_eq!(t.engine.held_call_id().await, Some(second_call));
    assert_eq!(
        t.engine.call_status(first_call).await.unwrap(),
        CallStatus::InCall
    );
    assert_eq!(
        t.engine.call_status(second_call).await.unwrap(),
        CallStatus::OnHold
    );
    assert!(t
        .peers
        .messages_for(first_session)
        .iter()
        .any(|m| matches!(m, IqMessage::ResumeCall(_))));
    assert!(t
        .peers
        .messages_for(second_session)
        .iter()
        .any(|m| matches!(m, IqMessage::HoldCall(_))));
}

#[tokio::test]
async fn test_merge_pulls_the_held_call_into_the_active_one() {
    let t = default_engine().await;
    let (held_call, held_session) = connected_incoming_call(&t).await;
    let (active_call, _) = connected_outgoing_call(&t).await;

    t.engine.merge_calls().await.unwrap();
    assert_eq!(t.engine.active_call_id().await, Some(active_call));
    assert_eq!(t.engine.held_call_id().await, None);

    // The moved leg is resumed towards its peer.
    assert!(t
        .peers
        .messages_for(held_session)
        .iter()
        .any(|m| matches!(m, IqMessage::ResumeCall(_))));
    assert!(t
        .peers
        .audio_directions
        .lock()
        .unwrap()
        .contains(&(held_session, true)));
    // Its session stays alive, owned by the merged call now.
    assert_eq!(t.peers.terminated_with(held_session), None);

    let events = t
        .events
        .wait_for("merge termination", |events| {
            events.iter().any(
                |e| matches!(e, CallEvent::CallTerminated { call_id, .. } if *call_id == held_call),
            )
        })
        .await;
    assert!(events.iter().any(|e| matches!(
        e,
        CallEvent::CallTerminated {
            call_id,
            reason: TerminateReason::Merge,
            missed: false,
        } if *call_id == held_call
    )));
    assert_eq!(
        t.engine.call_status(active_call).await.unwrap(),
        CallStatus::InCall
    );
}
