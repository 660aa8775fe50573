//! Trait definitions shared by drivers and services.
//!
//! # Submodules
//!
//! - `rotator`: the [`Rotator`] capability trait every driver implements
//! - `events`: the [`EventSink`] drivers publish heading changes into
//!
//! Drivers live in [`crate::hal`]; the hub and listeners that consume them
//! live in [`crate::services`].

pub mod events;
pub mod rotator;

pub use events::*;
pub use rotator::*;
