//! JSON message types shared by the HTTP API, the WebSocket protocol and the
//! remote proxy driver.
//!
//! Every field is `snake_case` on the wire.
//!
//! # Example
//!
//! ```
//! use rotator_hub::messages::{Event, EventKind, Request};
//!
//! let req: Request = serde_json::from_str(r#"{"name": "roof", "has_azimuth": true, "azimuth": 90}"#).unwrap();
//! assert_eq!(req.azimuth, 90);
//! assert!(!req.stop);
//!
//! let ev = Event::add("roof");
//! assert_eq!(ev.name, EventKind::Add);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::RotatorConfig;

// ============================================================================
// State
// ============================================================================

/// Live position and targets of one rotator, in whole degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// Current azimuth.
    pub azimuth: i32,
    /// Azimuth the rotator is turning to.
    pub az_preset: i32,
    /// Current elevation.
    pub elevation: i32,
    /// Elevation the rotator is tilting to.
    pub el_preset: i32,
}

/// Snapshot of a rotator as returned by `GET /api/rotator/:name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotatorObject {
    /// Rotator name.
    pub name: String,
    /// Position at the time of the snapshot.
    pub heading: Heading,
    /// Capabilities and limits.
    pub config: RotatorConfig,
}

/// `GET /api/rotators` body, keyed by rotator name.
pub type RotatorObjects = BTreeMap<String, RotatorObject>;

// ============================================================================
// Axis endpoints
// ============================================================================

/// `GET /api/rotator/:name/azimuth` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzimuthGet {
    /// Whether the rotator turns horizontally.
    pub has_azimuth: bool,
    /// Current azimuth.
    pub azimuth: i32,
    /// Target azimuth.
    pub preset: i32,
}

/// `PUT /api/rotator/:name/azimuth` body. A missing field is a bad request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzimuthPut {
    /// Requested azimuth.
    #[serde(default)]
    pub azimuth: Option<i32>,
}

/// `GET /api/rotator/:name/elevation` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevationGet {
    /// Whether the rotator tilts.
    pub has_elevation: bool,
    /// Current elevation.
    pub elevation: i32,
    /// Target elevation.
    pub preset: i32,
}

/// `PUT /api/rotator/:name/elevation` body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevationPut {
    /// Requested elevation.
    #[serde(default)]
    pub elevation: Option<i32>,
}

// ============================================================================
// WebSocket
// ============================================================================

/// Client to server: a batch of operations on one rotator.
///
/// Operations run in field order: set azimuth, set elevation, stop azimuth,
/// stop elevation, stop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// Target rotator.
    pub name: String,
    /// Apply `azimuth`.
    pub has_azimuth: bool,
    /// Azimuth to turn to.
    pub azimuth: i32,
    /// Apply `elevation`.
    pub has_elevation: bool,
    /// Elevation to tilt to.
    pub elevation: i32,
    /// Stop horizontal movement.
    pub stop_azimuth: bool,
    /// Stop vertical movement.
    pub stop_elevation: bool,
    /// Stop everything.
    pub stop: bool,
}

/// What happened to a rotator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A rotator was registered.
    Add,
    /// A rotator was removed.
    Remove,
    /// A rotator moved or got a new preset.
    Heading,
}

/// Server to client notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind.
    pub name: EventKind,
    /// Rotator the event is about.
    pub rotator_name: String,
    /// Position; zeroed for add/remove.
    #[serde(default)]
    pub heading: Heading,
}

impl Event {
    /// Rotator registered.
    pub fn add(rotator_name: impl Into<String>) -> Self {
        Self {
            name: EventKind::Add,
            rotator_name: rotator_name.into(),
            heading: Heading::default(),
        }
    }

    /// Rotator removed.
    pub fn remove(rotator_name: impl Into<String>) -> Self {
        Self {
            name: EventKind::Remove,
            rotator_name: rotator_name.into(),
            heading: Heading::default(),
        }
    }

    /// Rotator heading changed.
    pub fn heading(rotator_name: impl Into<String>, heading: Heading) -> Self {
        Self {
            name: EventKind::Heading,
            rotator_name: rotator_name.into(),
            heading,
        }
    }
}
