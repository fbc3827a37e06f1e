//! Device-transfer handshake through the orchestrator.
//!
//! The transferring device forewarns every participant (PrepareTransfer),
//! each one acks, and only when every ack has landed may the transfer
//! target's connected transition go through. The target's identity is
//! substituted from the outgoing leg so observers see a replacement, not a
//! leave-then-join.

mod common;

use common::{default_engine, TestEngine};
use meshcall_engine::wire::messages::{
    OnPrepareTransferIq, ParticipantTransferIq, TransferDoneIq,
};
use meshcall_engine::wire::IqMessage;
use meshcall_engine::{
    CallEvent, CallId, CallRoomId, CallRoomJoinInfo, CallRoomMember, ConnectionId,
    ConnectionState, MemberId, MemberStatus, Originator, ParticipantEventKind, PeerId, SessionId,
    TerminateReason, TransferDirection,
};

struct TransferSetup {
    call_id: CallId,
    room_id: CallRoomId,
    peer: PeerId,
    session_a: SessionId,
    session_b: SessionId,
}

/// Build a two-peer group call: an incoming leg from A plus a joined leg
/// towards B, both connected.
async fn group_call(t: &TestEngine) -> TransferSetup {
    let peer = PeerId::new();
    let session_a = SessionId::new();
    let call_id = t
        .engine
        .on_incoming_session(session_a, Originator::contact(peer), false)
        .await
        .unwrap();
    t.engine.accept_call(call_id).await.unwrap();
    t.engine
        .on_connection_state_changed(session_a, ConnectionState::Connected)
        .await
        .unwrap();

    let room_id = CallRoomId::new();
    t.engine.join_call_room(call_id, room_id).await.unwrap();
    let request_id = t.rooms.last_join_request();
    t.engine
        .on_join_call_room(
            request_id,
            Ok(CallRoomJoinInfo {
                room_id,
                local_member_id: MemberId::from("m0"),
                members: vec![
                    CallRoomMember {
                        member_id: MemberId::from("mA"),
                        peer_id: peer,
                        session_id: Some(session_a),
                        status: MemberStatus::HasSession,
                    },
                    CallRoomMember {
                        member_id: MemberId::from("mB"),
                        peer_id: PeerId::new(),
                        session_id: None,
                        status: MemberStatus::NewMemberNeedSession,
                    },
                ],
                max_members: 8,
            }),
        )
        .await;
    let session_b = t.peers.last_created_session();
    t.engine
        .on_connection_state_changed(session_b, ConnectionState::Connected)
        .await
        .unwrap();
    TransferSetup {
        call_id,
        room_id,
        peer,
        session_a,
        session_b,
    }
}

fn connected_events_for(events: &[CallEvent], connection_id: ConnectionId) -> usize {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                CallEvent::ParticipantEvent {
                    connection_id: c,
                    kind: ParticipantEventKind::Connected,
                    ..
                } if *c == connection_id
            )
        })
        .count()
}

#[tokio::test]
async fn test_transfer_target_waits_for_every_ack() {
    let t = default_engine().await;
    let s = group_call(&t).await;

    // Peer A announces it is handing over to member "mT".
    t.engine
        .on_data_frame(
            s.session_a,
            ParticipantTransferIq {
                request_id: 1,
                member_id: "mT".to_string(),
            }
            .encode(),
        )
        .await
        .unwrap();
    t.engine
        .prepare_transfer(s.call_id, MemberId::from("mT"), TransferDirection::ToDevice)
        .await
        .unwrap();
    // Both existing participants got the phase-1 packet.
    for session in [s.session_a, s.session_b] {
        assert!(t
            .peers
            .messages_for(session)
            .iter()
            .any(|m| matches!(m, IqMessage::PrepareTransfer(_))));
    }

    // The target (another device of A) dials in and is admitted into the
    // call; the room service then names its member id.
    let session_t = SessionId::new();
    let joined = t
        .engine
        .on_incoming_session(session_t, Originator::contact(s.peer), false)
        .await
        .unwrap();
    assert_eq!(joined, s.call_id);
    // One ParticipantAdded for the joined member B, a second for the target.
    let events = t
        .events
        .wait_for("target admitted", |events| {
            events
                .iter()
                .filter(|e| matches!(e, CallEvent::ParticipantAdded { .. }))
                .count()
                >= 2
        })
        .await;
    let target_connection = events
        .iter()
        .rev()
        .find_map(|e| match e {
            CallEvent::ParticipantAdded { participant, .. } => Some(participant.connection_id),
            _ => None,
        })
        .unwrap();
    t.engine
        .on_member_join_call_room(
            s.room_id,
            CallRoomMember {
                member_id: MemberId::from("mT"),
                peer_id: s.peer,
                session_id: Some(session_t),
                status: MemberStatus::HasSession,
            },
        )
        .await;

    // The target reaches the media path, but its connected transition is
    // deferred: one ack is still outstanding after the first reply.
    t.engine
        .on_connection_state_changed(session_t, ConnectionState::Connected)
        .await
        .unwrap();
    t.engine
        .on_data_frame(
            s.session_a,
            OnPrepareTransferIq { request_id: 2 }.encode(),
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(connected_events_for(&t.events.snapshot(), target_connection), 0);

    // The last ack releases it.
    t.engine
        .on_data_frame(
            s.session_b,
            OnPrepareTransferIq { request_id: 3 }.encode(),
        )
        .await
        .unwrap();
    let events = t
        .events
        .wait_for("deferred transition replayed", |events| {
            connected_events_for(events, target_connection) == 1
        })
        .await;
    // The outgoing leg's presentation was substituted onto the target.
    assert!(events.iter().any(|e| matches!(
        e,
        CallEvent::ParticipantEvent {
            connection_id,
            kind: ParticipantEventKind::IdentityChanged,
            ..
        } if *connection_id == target_connection
    )));
}

#[tokio::test]
async fn test_transfer_done_removes_the_outgoing_leg_silently() {
    let t = default_engine().await;
    let s = group_call(&t).await;

    // The target tells the outgoing device the handover is complete.
    t.engine
        .on_data_frame(s.session_a, TransferDoneIq { request_id: 9 }.encode())
        .await
        .unwrap();

    assert_eq!(
        t.peers.terminated_with(s.session_a),
        Some(TerminateReason::TransferDone)
    );
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    // An expected handover is not rendered as a participant leaving.
    assert!(!t
        .events
        .snapshot()
        .iter()
        .any(|e| matches!(e, CallEvent::ParticipantRemoved { .. })));
    // The other leg keeps the call alive.
    assert!(t.engine.call_status(s.call_id).await.is_ok());
    assert_eq!(t.peers.terminated_with(s.session_b), None);
}

#[tokio::test]
async fn test_participant_leaving_counts_as_its_ack() {
    let t = default_engine().await;
    let s = group_call(&t).await;

    t.engine
        .prepare_transfer(s.call_id, MemberId::from("mT"), TransferDirection::ToDevice)
        .await
        .unwrap();
    let session_t = SessionId::new();
    t.engine
        .on_incoming_session(session_t, Originator::contact(s.peer), false)
        .await
        .unwrap();
    let events = t
        .events
        .wait_for("target admitted", |events| {
            events
                .iter()
                .filter(|e| matches!(e, CallEvent::ParticipantAdded { .. }))
                .count()
                >= 2
        })
        .await;
    let target_connection = events
        .iter()
        .rev()
        .find_map(|e| match e {
            CallEvent::ParticipantAdded { participant, .. } => Some(participant.connection_id),
            _ => None,
        })
        .unwrap();
    t.engine
        .on_member_join_call_room(
            s.room_id,
            CallRoomMember {
                member_id: MemberId::from("mT"),
                peer_id: s.peer,
                session_id: Some(session_t),
                status: MemberStatus::HasSession,
            },
        )
        .await;
    t.engine
        .on_connection_state_changed(session_t, ConnectionState::Connected)
        .await
        .unwrap();

    // A acks; B never does, it drops instead. The deferred transition must
    // not stall on a participant that no longer exists.
    t.engine
        .on_data_frame(
            s.session_a,
            OnPrepareTransferIq { request_id: 2 }.encode(),
        )
        .await
        .unwrap();
    t.engine
        .on_connection_state_changed(s.session_b, ConnectionState::Failed)
        .await
        .unwrap();
    t.events
        .wait_for("replay after drop", |events| {
            connected_events_for(events, target_connection) == 1
        })
        .await;
}

#[tokio::test]
async fn test_transfer_direction_follows_the_handshake() {
    let t = default_engine().await;
    let s = group_call(&t).await;

    assert_eq!(
        t.engine.transfer_direction(s.call_id).await.unwrap(),
        TransferDirection::None
    );

    // Peer A names its replacement: a device-to-device handover begins.
    t.engine
        .on_data_frame(
            s.session_a,
            ParticipantTransferIq {
                request_id: 1,
                member_id: "mT".to_string(),
            }
            .encode(),
        )
        .await
        .unwrap();
    assert_eq!(
        t.engine.transfer_direction(s.call_id).await.unwrap(),
        TransferDirection::ToDevice
    );

    // The outgoing device disconnecting ends the handover and clears it.
    t.engine
        .on_data_frame(s.session_a, TransferDoneIq { request_id: 2 }.encode())
        .await
        .unwrap();
    assert_eq!(
        t.engine.transfer_direction(s.call_id).await.unwrap(),
        TransferDirection::None
    );

    // A locally initiated browser handover declares its own direction.
    t.engine
        .prepare_transfer(s.call_id, MemberId::from("mW"), TransferDirection::ToBrowser)
        .await
        .unwrap();
    assert_eq!(
        t.engine.transfer_direction(s.call_id).await.unwrap(),
        TransferDirection::ToBrowser
    );
}
