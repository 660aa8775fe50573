//! Kinematic rotator simulation.
//!
//! No device: a ticker moves each axis toward its preset at a constant
//! angular speed and publishes the heading whenever the whole-degree values
//! change. Useful for demos and for exercising the hub without hardware.
//!
//! # Azimuth regimes
//!
//! | Config | Motion |
//! |--------|--------|
//! | `min < max`, span < 360° | straight toward the preset |
//! | `min > max` (arc crosses 0°) | along the arc, never through the gap |
//! | span ≥ 360° | shortest way round unless that passes `azimuth_stop` |
//!
//! Elevation always moves straight toward its preset.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{RotatorConfig, SimulationSettings};
use crate::error::{Error, Result};
use crate::messages::Heading;
use crate::traits::{EventSink, Rotator};

struct State {
    azimuth: f32,
    az_preset: f32,
    elevation: f32,
    el_preset: f32,
    closed: bool,
}

impl State {
    fn heading(&self, config: &RotatorConfig) -> Heading {
        let mut azimuth = self.azimuth.round() as i32;
        if config.is_overlap() || config.is_full_turn() {
            azimuth = azimuth.rem_euclid(360);
        }
        Heading {
            azimuth,
            // beyond a full turn the preset keeps its clamped value
            az_preset: self.az_preset.round() as i32,
            elevation: self.elevation.round() as i32,
            el_preset: self.el_preset.round() as i32,
        }
    }

    /// Stop azimuth where it is reported to be.
    fn hold_azimuth(&mut self, config: &RotatorConfig) {
        let az = self.heading(config).azimuth as f32;
        self.azimuth = az;
        self.az_preset = az;
    }

    /// Stop elevation where it is reported to be.
    fn hold_elevation(&mut self) {
        let el = self.elevation.round();
        self.elevation = el;
        self.el_preset = el;
    }
}

/// A simulated rotator.
pub struct SimulatedRotator {
    config: RotatorConfig,
    settings: SimulationSettings,
    state: Mutex<State>,
    shutdown: CancellationToken,
    sink: EventSink,
}

impl SimulatedRotator {
    /// Create the rotator parked at its lowest position and start ticking.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: RotatorConfig, settings: SimulationSettings, sink: EventSink) -> Arc<Self> {
        let az = if config.has_azimuth && config.azimuth_min > 0 {
            config.azimuth_min as f32
        } else {
            0.0
        };
        let el = if config.has_elevation {
            config.elevation_min as f32
        } else {
            0.0
        };

        let rotator = Arc::new(Self {
            config,
            settings,
            state: Mutex::new(State {
                azimuth: az,
                az_preset: az,
                elevation: el,
                el_preset: el,
                closed: false,
            }),
            shutdown: CancellationToken::new(),
            sink,
        });

        tokio::spawn(Arc::clone(&rotator).run());
        rotator
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    async fn run(self: Arc<Self>) {
        let tick = self.settings.tick;
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => self.step(),
            }
        }
    }

    /// Advance one tick.
    fn step(&self) {
        let secs = self.settings.tick.as_secs_f32();
        let az_step = self.settings.azimuth_speed * secs;
        let el_step = self.settings.elevation_speed * secs;

        self.with_state(|s| {
            let before = s.heading(&self.config);

            if self.config.has_azimuth {
                s.azimuth = self.next_azimuth(s.azimuth, s.az_preset, az_step);
            }
            if self.config.has_elevation {
                s.elevation = approach(s.elevation, s.el_preset, el_step);
            }

            let after = s.heading(&self.config);
            if after != before {
                self.sink.publish(&self.config.name, after);
            }
        });
    }

    fn next_azimuth(&self, current: f32, target: f32, step: f32) -> f32 {
        let cfg = &self.config;

        if cfg.is_overlap() {
            // walk in arc coordinates, 0 at azimuth_min
            let min = cfg.azimuth_min as f32;
            let to_arc = |a: f32| (a - min).rem_euclid(360.0);
            let pos = approach(to_arc(current), to_arc(target), step);
            return (min + pos).rem_euclid(360.0);
        }

        if !cfg.is_full_turn() {
            return approach(current, target, step);
        }

        let stop = cfg.azimuth_stop as f32;
        let target = target.rem_euclid(360.0);
        let cw = (target - current).rem_euclid(360.0);
        if cw == 0.0 {
            return target;
        }
        let ccw = 360.0 - cw;

        // a path passes the stop if the stop lies strictly inside it
        let stop_cw = (stop - current).rem_euclid(360.0);
        let stop_ccw = (current - stop).rem_euclid(360.0);
        let cw_blocked = stop_cw > 0.0 && stop_cw < cw;
        let ccw_blocked = stop_ccw > 0.0 && stop_ccw < ccw;

        let go_cw = match (cw_blocked, ccw_blocked) {
            (true, false) => false,
            (false, true) => true,
            _ => cw <= ccw,
        };

        if go_cw {
            (current + step.min(cw)).rem_euclid(360.0)
        } else {
            (current - step.min(ccw)).rem_euclid(360.0)
        }
    }

    fn update(&self, f: impl FnOnce(&mut State)) -> Result<()> {
        self.with_state(|s| {
            if s.closed {
                return Err(Error::Closed);
            }
            let before = s.heading(&self.config);
            f(s);
            let after = s.heading(&self.config);
            if after != before {
                self.sink.publish(&self.config.name, after);
            }
            Ok(())
        })
    }
}

/// Move `current` toward `target` by at most `step`.
fn approach(current: f32, target: f32, step: f32) -> f32 {
    let delta = target - current;
    if delta.abs() <= step {
        target
    } else {
        current + step.copysign(delta)
    }
}

#[async_trait]
impl Rotator for SimulatedRotator {
    fn config(&self) -> &RotatorConfig {
        &self.config
    }

    fn heading(&self) -> Heading {
        self.with_state(|s| s.heading(&self.config))
    }

    async fn set_azimuth(&self, azimuth: i32) -> Result<()> {
        if !self.config.has_azimuth {
            return Ok(());
        }
        let az = self.config.clamp_azimuth(azimuth);
        self.update(|s| s.az_preset = az as f32)
    }

    async fn set_elevation(&self, elevation: i32) -> Result<()> {
        if !self.config.has_elevation {
            return Ok(());
        }
        let el = self.config.clamp_elevation(elevation);
        self.update(|s| s.el_preset = el as f32)
    }

    async fn stop_azimuth(&self) -> Result<()> {
        if !self.config.has_azimuth {
            return Ok(());
        }
        self.update(|s| s.hold_azimuth(&self.config))
    }

    async fn stop_elevation(&self) -> Result<()> {
        if !self.config.has_elevation {
            return Ok(());
        }
        self.update(|s| s.hold_elevation())
    }

    async fn stop(&self) -> Result<()> {
        self.update(|s| {
            s.hold_azimuth(&self.config);
            s.hold_elevation();
        })
    }

    async fn close(&self) {
        if self.with_state(|s| std::mem::replace(&mut s.closed, true)) {
            return;
        }
        self.shutdown.cancel();
        log::info!("{}: simulation stopped", self.config.name);
    }
}
