//! The capability contract every rotator driver fulfils.
//!
//! Callers (the hub, the HTTP handlers, the TCP and WebSocket clients) only
//! ever see `Arc<dyn Rotator>`; whether the rotator is a serial controller, a
//! simulation or a proxy to another hub is invisible to them.
//!
//! # Capability Rules
//!
//! | Call | Axis disabled | Axis enabled |
//! |------|---------------|--------------|
//! | `set_azimuth` / `set_elevation` | `Ok(())`, nothing happens | clamp, update preset, command device |
//! | `stop_azimuth` / `stop_elevation` | `Ok(())`, nothing happens | preset := current position |
//! | `stop` | stops whichever axes exist | |
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rotator_hub::traits::Rotator;
//!
//! async fn park(rotator: Arc<dyn Rotator>) -> rotator_hub::Result<()> {
//!     rotator.set_azimuth(0).await?;
//!     if rotator.has_elevation() {
//!         rotator.set_elevation(90).await?;
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;

use crate::config::RotatorConfig;
use crate::error::{Error, Result};
use crate::messages::{Heading, Request, RotatorObject};

/// An antenna rotator with an azimuth and/or elevation axis.
#[async_trait]
pub trait Rotator: Send + Sync {
    /// Capabilities and limits; fixed for the driver's lifetime.
    fn config(&self) -> &RotatorConfig;

    /// Current position and presets.
    fn heading(&self) -> Heading;

    /// Turn to `azimuth` degrees, clamped to the configured arc.
    async fn set_azimuth(&self, azimuth: i32) -> Result<()>;

    /// Tilt to `elevation` degrees, clamped to the configured range.
    async fn set_elevation(&self, elevation: i32) -> Result<()>;

    /// Stop horizontal movement.
    async fn stop_azimuth(&self) -> Result<()>;

    /// Stop vertical movement.
    async fn stop_elevation(&self) -> Result<()>;

    /// Stop all movement.
    async fn stop(&self) -> Result<()>;

    /// Shut down background tasks and release the device. Idempotent.
    async fn close(&self);

    /// Unique name.
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Whether the rotator turns horizontally.
    fn has_azimuth(&self) -> bool {
        self.config().has_azimuth
    }

    /// Whether the rotator tilts.
    fn has_elevation(&self) -> bool {
        self.config().has_elevation
    }

    /// Current azimuth.
    fn azimuth(&self) -> i32 {
        self.heading().azimuth
    }

    /// Target azimuth.
    fn az_preset(&self) -> i32 {
        self.heading().az_preset
    }

    /// Current elevation.
    fn elevation(&self) -> i32 {
        self.heading().elevation
    }

    /// Target elevation.
    fn el_preset(&self) -> i32 {
        self.heading().el_preset
    }

    /// Snapshot for the API.
    fn serialize(&self) -> RotatorObject {
        RotatorObject {
            name: self.name().to_string(),
            heading: self.heading(),
            config: self.config().clone(),
        }
    }

    /// Apply a WebSocket request.
    ///
    /// Every requested operation runs even if an earlier one fails; the
    /// first error is returned and later ones are logged.
    async fn execute_request(&self, req: &Request) -> Result<()> {
        let mut first_err = None;

        if req.has_azimuth {
            keep_first(&mut first_err, self.name(), self.set_azimuth(req.azimuth).await);
        }
        if req.has_elevation {
            keep_first(&mut first_err, self.name(), self.set_elevation(req.elevation).await);
        }
        if req.stop_azimuth {
            keep_first(&mut first_err, self.name(), self.stop_azimuth().await);
        }
        if req.stop_elevation {
            keep_first(&mut first_err, self.name(), self.stop_elevation().await);
        }
        if req.stop {
            keep_first(&mut first_err, self.name(), self.stop().await);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn keep_first(first: &mut Option<Error>, name: &str, res: Result<()>) {
    if let Err(e) = res {
        if first.is_none() {
            *first = Some(e);
        } else {
            log::warn!("{name}: {e}");
        }
    }
}
