//! Engine configuration.
//!
//! Built with chained `with_*` methods and validated once when the
//! orchestrator is created:
//!
//! ```rust
//! use meshcall_engine::config::CallConfig;
//! use std::time::Duration;
//!
//! let config = CallConfig::new()
//!     .with_product_name("CallService")
//!     .with_version(1, 5, 0)
//!     .with_incoming_ring_timeout(Duration::from_secs(45));
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::capabilities::ZoomPolicy;
use crate::error::{EngineError, EngineResult};

/// Configuration for the call engine.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Product segment advertised in the version string
    pub product_name: String,
    /// Advertised semantic version
    pub version: (u32, u32, u32),
    /// Advertise the media stream side-channel
    pub advertise_stream: bool,
    /// Advertise the device-transfer handshake
    pub advertise_transfer: bool,
    /// Advertise in-call descriptor messages
    pub advertise_message: bool,
    /// Advertise geolocation descriptors
    pub advertise_geoloc: bool,
    /// Local policy for remote camera/zoom control
    pub zoom_policy: ZoomPolicy,
    /// How long an unanswered incoming call rings
    pub incoming_ring_timeout: Duration,
    /// How long an unanswered outgoing call rings
    pub outgoing_ring_timeout: Duration,
    /// How long an accepted call may take to reach the media path
    pub connect_timeout: Duration,
    /// Grace period before releasing resources after termination
    pub shutdown_grace: Duration,
    /// Maximum members in a call room, local side included
    pub max_room_members: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            product_name: "meshcall".to_string(),
            version: (2, 1, 0),
            advertise_stream: true,
            advertise_transfer: true,
            advertise_message: true,
            advertise_geoloc: true,
            zoom_policy: ZoomPolicy::Never,
            incoming_ring_timeout: Duration::from_secs(45),
            outgoing_ring_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(20),
            shutdown_grace: Duration::from_secs(2),
            max_room_members: 8,
        }
    }
}

impl CallConfig {
    /// Configuration with default timeouts and policies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised product name.
    pub fn with_product_name(mut self, name: impl Into<String>) -> Self {
        self.product_name = name.into();
        self
    }

    /// Set the advertised semantic version.
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.version = (major, minor, patch);
        self
    }

    /// Set the remote camera/zoom grant policy.
    pub fn with_zoom_policy(mut self, policy: ZoomPolicy) -> Self {
        self.zoom_policy = policy;
        self
    }

    /// Set how long an unanswered incoming call rings.
    pub fn with_incoming_ring_timeout(mut self, timeout: Duration) -> Self {
        self.incoming_ring_timeout = timeout;
        self
    }

    /// Set how long an unanswered outgoing call rings.
    pub fn with_outgoing_ring_timeout(mut self, timeout: Duration) -> Self {
        self.outgoing_ring_timeout = timeout;
        self
    }

    /// Set how long an accepted call may take to reach the media path.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the post-termination grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the maximum call-room size.
    pub fn with_max_room_members(mut self, max: usize) -> Self {
        self.max_room_members = max;
        self
    }

    /// The version/capability string this engine advertises on data-channel
    /// open. The format is fixed by the wire protocol.
    pub fn local_version_string(&self) -> String {
        let mut caps: Vec<&str> = Vec::new();
        if self.advertise_stream {
            caps.push(meshcall_wire::version::CAP_STREAM);
        }
        if self.advertise_transfer {
            caps.push(meshcall_wire::version::CAP_TRANSFER);
        }
        if self.advertise_message {
            caps.push(meshcall_wire::version::CAP_MESSAGE);
        }
        if self.advertise_geoloc {
            caps.push(meshcall_wire::version::CAP_GEOLOC);
        }
        match self.zoom_policy {
            ZoomPolicy::Allow => caps.push(meshcall_wire::version::CAP_ZOOMABLE),
            ZoomPolicy::Ask => caps.push(meshcall_wire::version::CAP_ZOOM_ASK),
            ZoomPolicy::Never => {}
        }
        meshcall_wire::format_version_string(
            &self.product_name,
            self.version.0,
            self.version.1,
            self.version.2,
            &caps,
        )
    }

    /// Validate the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.product_name.is_empty() || self.product_name.contains(':') {
            return Err(EngineError::InvalidConfiguration {
                message: "product name must be non-empty and contain no ':'".to_string(),
            });
        }
        if self.max_room_members < 2 {
            return Err(EngineError::InvalidConfiguration {
                message: "max_room_members must be at least 2".to_string(),
            });
        }
        if self.incoming_ring_timeout.is_zero() || self.outgoing_ring_timeout.is_zero() {
            return Err(EngineError::InvalidConfiguration {
                message: "ring timeouts must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
