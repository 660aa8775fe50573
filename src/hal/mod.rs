//! Rotator drivers.
//!
//! Concrete implementations of [`crate::traits::Rotator`].
//!
//! # Available Implementations
//!
//! - `gs232`: Yaesu/ARS controllers on a serial line or TCP bridge
//! - `simulated`: kinematic simulation, no hardware
//! - `remote`: proxy to a rotator on another hub (requires `remote` feature)
//! - `mock`: test doubles
//!
//! `transport` opens the byte stream a GS232 driver runs on.

pub mod gs232;
pub mod mock;
pub mod simulated;
pub mod transport;

#[cfg(feature = "remote")]
pub mod remote;

pub use gs232::Gs232Rotator;
pub use mock::*;
pub use simulated::SimulatedRotator;

#[cfg(feature = "remote")]
pub use remote::RemoteRotator;
