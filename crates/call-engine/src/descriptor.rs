//! In-call descriptor log.
//!
//! Descriptors are conversation-style content exchanged during a call:
//! text messages and a geolocation snapshot. The log is append-only; the
//! geolocation descriptor is special in that the first send creates it and
//! every later send mutates the same entry in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DescriptorId;

/// Payload of one descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DescriptorContent {
    /// A text message
    Message {
        /// Message body
        text: String,
    },
    /// A geolocation snapshot
    Geolocation {
        /// Latitude in degrees
        latitude: f64,
        /// Longitude in degrees
        longitude: f64,
        /// Altitude in meters, when known
        altitude: Option<f64>,
    },
}

/// One entry in a call's descriptor log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Stable id of this entry
    pub id: DescriptorId,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// When the entry last changed (equals `created_at` until updated)
    pub updated_at: DateTime<Utc>,
    /// Whether the local user produced this entry
    pub outbound: bool,
    /// The content
    pub content: DescriptorContent,
}

/// Append-only descriptor log with a replace-in-place geolocation slot.
#[derive(Debug, Clone, Default)]
pub struct DescriptorLog {
    entries: Vec<Descriptor>,
    geolocation: Option<DescriptorId>,
}

/// Outcome of a geolocation send: created a new descriptor or updated the
/// existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeolocationChange {
    /// First send created the shared descriptor
    Created,
    /// A later send mutated it in place
    Updated,
}

impl DescriptorLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message descriptor and return a snapshot of it.
    pub fn push_message(&mut self, text: String, outbound: bool) -> Descriptor {
        let now = Utc::now();
        let descriptor = Descriptor {
            id: DescriptorId::new(),
            created_at: now,
            updated_at: now,
            outbound,
            content: DescriptorContent::Message { text },
        };
        self.entries.push(descriptor.clone());
        descriptor
    }

    /// Create or update the geolocation descriptor in place.
    pub fn set_geolocation(
        &mut self,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
        outbound: bool,
    ) -> (Descriptor, GeolocationChange) {
        let content = DescriptorContent::Geolocation {
            latitude,
            longitude,
            altitude,
        };
        if let Some(id) = self.geolocation {
            if let Some(entry) = self.entries.iter_mut().find(|d| d.id == id) {
                entry.content = content;
                entry.updated_at = Utc::now();
                return (entry.clone(), GeolocationChange::Updated);
            }
        }
        let now = Utc::now();
        let descriptor = Descriptor {
            id: DescriptorId::new(),
            created_at: now,
            updated_at: now,
            outbound,
            content,
        };
        self.geolocation = Some(descriptor.id);
        self.entries.push(descriptor.clone());
        (descriptor, GeolocationChange::Created)
    }

    /// Remove the geolocation descriptor, returning its id when one existed.
    pub fn clear_geolocation(&mut self) -> Option<DescriptorId> {
        let id = self.geolocation.take()?;
        self.entries.retain(|d| d.id != id);
        Some(id)
    }

    /// Current geolocation snapshot, when one exists.
    pub fn geolocation(&self) -> Option<&Descriptor> {
        let id = self.geolocation?;
        self.entries.iter().find(|d| d.id == id)
    }

    /// All entries in creation order.
    pub fn entries(&self) -> &[Descriptor] {
        &self.entries
    }
}
