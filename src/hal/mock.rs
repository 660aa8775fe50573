//! Test doubles for code that consumes rotators or writes to clients.
//!
//! # Available Mocks
//!
//! | Mock | Stands in for | Purpose |
//! |------|---------------|---------|
//! | [`MockRotator`] | [`Rotator`] | Instant moves, recorded calls, injectable failure |
//! | [`FailingWriter`] | a dead socket | Every write fails with `BrokenPipe` |
//!
//! # Example
//!
//! ```rust
//! use rotator_hub::hal::MockRotator;
//! use rotator_hub::traits::Rotator;
//!
//! # tokio_test_block(async {
//! let rotator = MockRotator::new("roof");
//! rotator.set_azimuth(90).await.unwrap();
//!
//! assert_eq!(rotator.az_preset(), 90);
//! assert_eq!(rotator.calls(), vec!["set_azimuth(90)"]);
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::config::RotatorConfig;
use crate::error::{Error, Result};
use crate::messages::Heading;
use crate::traits::Rotator;

// ============================================================================
// Mock Rotator
// ============================================================================

#[derive(Debug, Default)]
struct MockState {
    heading: Heading,
    calls: Vec<String>,
    failing: bool,
    closed: usize,
}

/// A rotator that only records what it was asked to do.
///
/// Presets are clamped like a real driver; the live position only changes
/// through [`set_position`](Self::set_position).
#[derive(Debug)]
pub struct MockRotator {
    config: RotatorConfig,
    state: Mutex<MockState>,
}

impl MockRotator {
    /// Azimuth-only rotator with default limits.
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_config(RotatorConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Rotator with explicit capabilities.
    pub fn with_config(config: RotatorConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(MockState::default()),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Pretend the device reported a position.
    pub fn set_position(&self, azimuth: i32, elevation: i32) {
        self.with_state(|s| {
            s.heading.azimuth = azimuth;
            s.heading.elevation = elevation;
        });
    }

    /// Make every command fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.with_state(|s| s.failing = failing);
    }

    /// Commands received so far, e.g. `"set_azimuth(90)"`.
    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    /// How many times `close` ran.
    pub fn close_count(&self) -> usize {
        self.with_state(|s| s.closed)
    }

    fn record(&self, call: String, f: impl FnOnce(&mut Heading)) -> Result<()> {
        self.with_state(|s| {
            s.calls.push(call);
            if s.failing {
                return Err(Error::Transport("mock failure".into()));
            }
            f(&mut s.heading);
            Ok(())
        })
    }
}

#[async_trait]
impl Rotator for MockRotator {
    fn config(&self) -> &RotatorConfig {
        &self.config
    }

    fn heading(&self) -> Heading {
        self.with_state(|s| s.heading)
    }

    async fn set_azimuth(&self, azimuth: i32) -> Result<()> {
        if !self.config.has_azimuth {
            return Ok(());
        }
        let az = self.config.clamp_azimuth(azimuth);
        self.record(format!("set_azimuth({azimuth})"), |h| h.az_preset = az)
    }

    async fn set_elevation(&self, elevation: i32) -> Result<()> {
        if !self.config.has_elevation {
            return Ok(());
        }
        let el = self.config.clamp_elevation(elevation);
        self.record(format!("set_elevation({elevation})"), |h| h.el_preset = el)
    }

    async fn stop_azimuth(&self) -> Result<()> {
        self.record("stop_azimuth".into(), |h| h.az_preset = h.azimuth)
    }

    async fn stop_elevation(&self) -> Result<()> {
        self.record("stop_elevation".into(), |h| h.el_preset = h.elevation)
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop".into(), |h| {
            h.az_preset = h.azimuth;
            h.el_preset = h.elevation;
        })
    }

    async fn close(&self) {
        self.with_state(|s| s.closed += 1);
    }
}

// ============================================================================
// Failing Writer
// ============================================================================

/// An `AsyncWrite` whose peer is gone.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
