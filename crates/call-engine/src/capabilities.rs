//! Negotiated peer capabilities.
//!
//! Until the data channel opens and the peer advertises itself, every
//! capability is [`CapabilitySupport::Unknown`]. The advertisement string is
//! parsed by [`meshcall_wire::version`]; this module lifts the parse result
//! into the tri-state model the state machines consume.

use serde::{Deserialize, Serialize};

use meshcall_wire::version::PeerVersion;
use meshcall_wire::ZoomMode;

/// Tri-state capability value: unknown until the peer advertises, then
/// supported or unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CapabilitySupport {
    /// The data channel has not advertised yet
    #[default]
    Unknown,
    /// The peer advertised support
    Supported,
    /// The peer advertised, and this capability was absent
    Unsupported,
}

impl CapabilitySupport {
    fn from_bool(value: bool) -> Self {
        if value {
            CapabilitySupport::Supported
        } else {
            CapabilitySupport::Unsupported
        }
    }

    /// True only when positively advertised.
    pub fn is_supported(self) -> bool {
        self == CapabilitySupport::Supported
    }
}

/// Local policy for granting remote camera/zoom control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZoomPolicy {
    /// Always deny
    #[default]
    Never,
    /// Ask the local user before granting
    Ask,
    /// Grant immediately
    Allow,
}

/// Everything negotiated with one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCapabilities {
    /// Raw parsed version, kept for diagnostics
    pub version: Option<PeerVersion>,
    /// Media stream side-channel
    pub stream: CapabilitySupport,
    /// Device-transfer handshake
    pub transfer: CapabilitySupport,
    /// In-call descriptor messages
    pub message: CapabilitySupport,
    /// Geolocation descriptors
    pub geoloc: CapabilitySupport,
    /// Remote zoom grant mode advertised by the peer
    pub zoom: ZoomMode,
    /// Group calls (inferred from the semantic version)
    pub group_calls: bool,
    /// Schedule restrictions (inferred from the semantic version)
    pub schedule: bool,
}

impl PeerCapabilities {
    /// All-unknown capabilities, before the peer has advertised.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Apply a received advertisement string.
    pub fn apply_version_string(&mut self, value: &str) {
        let parsed = PeerVersion::parse(value);
        self.stream = CapabilitySupport::from_bool(parsed.stream);
        self.transfer = CapabilitySupport::from_bool(parsed.transfer);
        self.message = CapabilitySupport::from_bool(parsed.message);
        self.geoloc = CapabilitySupport::from_bool(parsed.geoloc);
        self.zoom = parsed.zoom;
        self.group_calls = parsed.supports_group_calls();
        self.schedule = parsed.supports_schedule();
        self.version = Some(parsed);
    }

    /// Whether the peer has advertised at all.
    pub fn is_known(&self) -> bool {
        self.version.is_some()
    }
}
