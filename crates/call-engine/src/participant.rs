//! Per-peer identity and presentation state.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use meshcall_wire::messages::ParticipantInfoIq;

use crate::types::{ConnectionId, PeerId, VideoGeometry};

/// Identity and presentation state for one peer in a call.
///
/// A participant never owns a connection; it carries the id of the
/// connection it is rendered through. Most connections carry exactly one
/// participant, but SFU-style topologies hang several participants off a
/// single connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParticipant {
    /// Connection this participant is rendered through
    pub connection_id: ConnectionId,
    /// Peer routing identity, once known
    pub peer_id: Option<PeerId>,
    /// Display name
    pub name: Option<String>,
    /// Display description (subtitle)
    pub description: Option<String>,
    /// Avatar image bytes
    pub avatar: Option<Bytes>,
    /// Group avatar image bytes, for group-originated calls
    pub group_avatar: Option<Bytes>,
    /// Peer's microphone is muted
    pub audio_muted: bool,
    /// Peer's camera is muted
    pub camera_muted: bool,
    /// Peer is sharing its screen
    pub screen_sharing: bool,
    /// Last reported geometry of the peer's video track
    pub video_geometry: Option<VideoGeometry>,
    /// Participant this one replaced through a device transfer
    pub transferred_from: Option<ConnectionId>,
    /// Participant that replaced this one through a device transfer
    pub transferred_to: Option<ConnectionId>,
    /// Peer's camera-capability bitmap, learned from camera responses
    pub camera_bitmap: i32,
    /// Peer's active camera index, learned from camera responses
    pub active_camera: i32,
}

impl CallParticipant {
    /// Fresh participant with no identity yet.
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            peer_id: None,
            name: None,
            description: None,
            avatar: None,
            group_avatar: None,
            audio_muted: false,
            camera_muted: false,
            screen_sharing: false,
            video_geometry: None,
            transferred_from: None,
            transferred_to: None,
            camera_bitmap: 0,
            active_camera: 0,
        }
    }

    /// Apply an identity announcement received from the peer. Returns true
    /// when anything visible changed.
    pub fn apply_info(&mut self, info: &ParticipantInfoIq) -> bool {
        let mut changed = false;
        if self.name.as_deref() != Some(info.name.as_str()) {
            self.name = Some(info.name.clone());
            changed = true;
        }
        if self.description != info.description {
            self.description = info.description.clone();
            changed = true;
        }
        if let Some(thumbnail) = &info.thumbnail {
            if self.avatar.as_ref() != Some(thumbnail) {
                self.avatar = Some(thumbnail.clone());
                changed = true;
            }
        }
        changed
    }

    /// Copy the presentation of an outgoing participant onto this one and
    /// record the bidirectional transfer link, so a device transfer renders
    /// as a seamless replacement rather than a leave plus a join.
    pub fn substitute_from(&mut self, outgoing: &CallParticipant) {
        self.name = outgoing.name.clone();
        self.description = outgoing.description.clone();
        self.avatar = outgoing.avatar.clone();
        self.group_avatar = outgoing.group_avatar.clone();
        self.transferred_from = Some(outgoing.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_info_reports_changes() {
        let mut p = CallParticipant::new(ConnectionId::new());
        let info = ParticipantInfoIq {
            request_id: 1,
            member_id: "m1".to_string(),
            name: "Alice".to_string(),
            description: None,
            thumbnail: None,
        };
        assert!(p.apply_info(&info));
        assert_eq!(p.name.as_deref(), Some("Alice"));
        // Re-applying the same identity is not a change.
        assert!(!p.apply_info(&info));
    }

    #[test]
    fn test_substitution_links_both_sides() {
        let outgoing_id = ConnectionId::new();
        let mut outgoing = CallParticipant::new(outgoing_id);
        outgoing.name = Some("Alice".to_string());
        outgoing.description = Some("phone".to_string());

        let mut target = CallParticipant::new(ConnectionId::new());
        target.substitute_from(&outgoing);
        outgoing.transferred_to = Some(target.connection_id);

        assert_eq!(target.name.as_deref(), Some("Alice"));
        assert_eq!(target.transferred_from, Some(outgoing_id));
        assert_eq!(outgoing.transferred_to, Some(target.connection_id));
    }
}
