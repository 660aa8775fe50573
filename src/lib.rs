//! # rotator-hub
//!
//! Antenna rotator drivers and a hub that shares them with any number of
//! clients.
//!
//! ## Features
//!
//! - **Drivers**: Yaesu/ARS GS232 controllers over serial or TCP, a kinematic
//!   simulator, and a proxy for rotators served by another hub
//! - **Hub**: named rotator registry with hot add/remove and event fan-out
//! - **Client protocols**: GS232 emulation over TCP, JSON over WebSocket, and
//!   a REST API
//!
//! ## Architecture
//!
//! - `codec` - GS232 wire formats, both directions
//! - `config` - validated rotator limits and server settings
//! - `messages` - JSON types shared by HTTP, WebSocket and the proxy driver
//! - `traits` - the `Rotator` capability and the event sink drivers publish to
//! - `hal` - driver implementations
//! - `services` - hub, TCP, WebSocket and HTTP listeners
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use rotator_hub::{
//!     config::{RotatorConfig, SimulationSettings, WsConfig},
//!     hal::SimulatedRotator,
//!     services::Hub,
//!     traits::{EventSink, Rotator},
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let hub = Hub::new(EventSink::default(), WsConfig::default());
//!
//! let config = RotatorConfig::builder("roof")
//!     .with_azimuth_range(0, 450)
//!     .build()
//!     .unwrap();
//! let rotator = SimulatedRotator::new(config, SimulationSettings::default(), hub.sink());
//! hub.add_rotator(rotator.clone()).await.unwrap();
//!
//! rotator.set_azimuth(90).await.unwrap();
//! assert_eq!(hub.rotator("roof").unwrap().az_preset(), 90);
//! # });
//! ```

#![warn(missing_docs)]

/// GS232 controller and client wire formats.
pub mod codec;
/// Rotator limits, driver settings and listener configuration.
pub mod config;
/// Crate-wide error type.
pub mod error;
/// Rotator driver implementations.
pub mod hal;
/// JSON message types.
pub mod messages;
/// Hub and client-facing listeners.
pub mod services;
/// Rotator capability trait and event sink.
pub mod traits;

pub use config::{Config, RotatorConfig};
pub use error::{Error, Result};
pub use messages::{Event, EventKind, Heading, Request, RotatorObject};
pub use services::Hub;
pub use traits::{EventSink, Rotator};
