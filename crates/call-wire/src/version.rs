//! Peer version and capability string handling.
//!
//! On data-channel open each side advertises itself with a single string of
//! the form `"<product>:<version>:<cap1>,<cap2>,...,<capN>"`. The capability
//! list is order-independent and unknown tokens are ignored so that older
//! peers can talk to newer ones. A string with fewer than three
//! colon-delimited segments carries no capability list at all and every
//! capability stays at its "not supported" default.
//!
//! Group-call and schedule (time-window call restriction) support are not
//! capability tokens; they are inferred from the semantic version number:
//! major >= 2 implies group calls, and major >= 3 (or 2.1+) implies
//! schedule support.

use serde::{Deserialize, Serialize};

/// Capability token: peer can receive a media stream side-channel.
pub const CAP_STREAM: &str = "stream";
/// Capability token: peer supports the device-transfer handshake.
pub const CAP_TRANSFER: &str = "transfer";
/// Capability token: peer accepts in-call descriptor messages.
pub const CAP_MESSAGE: &str = "message";
/// Capability token: peer accepts geolocation descriptors.
pub const CAP_GEOLOC: &str = "geoloc";
/// Capability token: peer allows remote zoom unconditionally.
pub const CAP_ZOOMABLE: &str = "zoomable";
/// Capability token: peer allows remote zoom after a confirmation round-trip.
pub const CAP_ZOOM_ASK: &str = "zoom-ask";

/// How a peer grants remote camera/zoom control.
///
/// `zoomable` and `zoom-ask` are mutually exclusive on the wire; if a
/// malformed peer sends both, the unconditional grant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZoomMode {
    /// Remote zoom is not allowed (the default)
    #[default]
    Never,
    /// Remote zoom requires a prior confirmation round-trip
    Ask,
    /// Remote zoom is allowed unconditionally
    Allow,
}

/// Parsed peer version string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerVersion {
    /// Product segment, when present
    pub product: Option<String>,
    /// Semantic version major component
    pub major: u32,
    /// Semantic version minor component
    pub minor: u32,
    /// Semantic version patch component
    pub patch: u32,
    /// Peer can receive a media stream side-channel
    pub stream: bool,
    /// Peer supports the device-transfer handshake
    pub transfer: bool,
    /// Peer accepts in-call descriptor messages
    pub message: bool,
    /// Peer accepts geolocation descriptors
    pub geoloc: bool,
    /// Remote camera/zoom grant mode
    pub zoom: ZoomMode,
}

impl PeerVersion {
    /// Parse a peer version string.
    ///
    /// Never fails: a malformed or empty string yields the all-defaults
    /// value, which is the correct interoperability posture for an unknown
    /// or ancient peer.
    pub fn parse(value: &str) -> Self {
        let mut parsed = PeerVersion::default();
        let segments: Vec<&str> = value.split(':').collect();

        if let Some(product) = segments.first() {
            if !product.is_empty() {
                parsed.product = Some((*product).to_string());
            }
        }
        if let Some(version) = segments.get(1) {
            let mut numbers = version.split('.');
            parsed.major = numbers.next().and_then(|n| n.parse().ok()).unwrap_or(0);
            parsed.minor = numbers.next().and_then(|n| n.parse().ok()).unwrap_or(0);
            parsed.patch = numbers.next().and_then(|n| n.parse().ok()).unwrap_or(0);
        }

        // Fewer than 3 segments: no capability list, keep all defaults.
        if let Some(caps) = segments.get(2) {
            for token in caps.split(',') {
                match token.trim() {
                    CAP_STREAM => parsed.stream = true,
                    CAP_TRANSFER => parsed.transfer = true,
                    CAP_MESSAGE => parsed.message = true,
                    CAP_GEOLOC => parsed.geoloc = true,
                    CAP_ZOOMABLE => parsed.zoom = ZoomMode::Allow,
                    CAP_ZOOM_ASK => {
                        if parsed.zoom == ZoomMode::Never {
                            parsed.zoom = ZoomMode::Ask;
                        }
                    }
                    // Unknown tokens come from newer peers; ignore them.
                    _ => {}
                }
            }
        }
        parsed
    }

    /// True when the peer understands group calls (call rooms).
    pub fn supports_group_calls(&self) -> bool {
        self.major >= 2
    }

    /// True when the peer understands schedule (time-window) restrictions.
    pub fn supports_schedule(&self) -> bool {
        self.major >= 3 || (self.major == 2 && self.minor >= 1)
    }
}

/// Format the local advertisement string sent on data-channel open.
///
/// The layout `"<product>:<version>:<csv-capabilities>"` must be preserved
/// exactly for interoperability with existing peers.
pub fn format_version_string(
    product: &str,
    major: u32,
    minor: u32,
    patch: u32,
    capabilities: &[&str],
) -> String {
    format!(
        "{}:{}.{}.{}:{}",
        product,
        major,
        minor,
        patch,
        capabilities.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_capability_string() {
        let v = PeerVersion::parse("X:1.5.0:stream,message,zoom-ask");
        assert_eq!(v.product.as_deref(), Some("X"));
        assert_eq!((v.major, v.minor, v.patch), (1, 5, 0));
        assert!(v.stream);
        assert!(v.message);
        assert!(!v.transfer);
        assert!(!v.geoloc);
        assert_eq!(v.zoom, ZoomMode::Ask);
    }

    #[test]
    fn test_parse_without_capability_segment_yields_defaults() {
        let v = PeerVersion::parse("CallService:2.1.3");
        assert!(!v.stream);
        assert!(!v.transfer);
        assert!(!v.message);
        assert!(!v.geoloc);
        assert_eq!(v.zoom, ZoomMode::Never);
        // The semantic version is still read for group/schedule inference.
        assert!(v.supports_group_calls());
        assert!(v.supports_schedule());
    }

    #[test]
    fn test_parse_empty_string_yields_defaults() {
        let v = PeerVersion::parse("");
        assert_eq!(v, PeerVersion::default());
    }

    #[test]
    fn test_unknown_tokens_are_ignored() {
        let v = PeerVersion::parse("X:1.0.0:stream,hologram,transfer");
        assert!(v.stream);
        assert!(v.transfer);
        assert!(!v.message);
    }

    #[test]
    fn test_token_order_is_irrelevant() {
        let a = PeerVersion::parse("X:1.0.0:geoloc,stream");
        let b = PeerVersion::parse("X:1.0.0:stream,geoloc");
        assert_eq!(a, b);
    }

    #[test]
    fn test_zoomable_wins_over_zoom_ask() {
        let v = PeerVersion::parse("X:1.0.0:zoom-ask,zoomable");
        assert_eq!(v.zoom, ZoomMode::Allow);
        let v = PeerVersion::parse("X:1.0.0:zoomable,zoom-ask");
        assert_eq!(v.zoom, ZoomMode::Allow);
    }

    #[test]
    fn test_group_and_schedule_inference() {
        assert!(!PeerVersion::parse("X:1.9.9").supports_group_calls());
        assert!(PeerVersion::parse("X:2.0.0").supports_group_calls());
        assert!(!PeerVersion::parse("X:2.0.9").supports_schedule());
        assert!(PeerVersion::parse("X:2.1.0").supports_schedule());
        assert!(PeerVersion::parse("X:3.0.0").supports_schedule());
    }

    #[test]
    fn test_format_round_trips_through_parse() {
        let s = format_version_string("CallService", 1, 5, 0, &[CAP_STREAM, CAP_TRANSFER, CAP_MESSAGE]);
        assert_eq!(s, "CallService:1.5.0:stream,transfer,message");
        let v = PeerVersion::parse(&s);
        assert!(v.stream && v.transfer && v.message);
        assert!(!v.geoloc);
    }
}
