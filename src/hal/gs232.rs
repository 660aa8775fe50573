//! Driver for GS232-compatible rotator controllers (Yaesu, ARS).
//!
//! Three activities share one state block:
//!
//! - a **reader** task turning controller output into heading updates
//! - a **poller** task sending `C2` every polling interval and checking the
//!   watchdog
//! - the **command** methods of [`Rotator`], called by anyone
//!
//! The state block sits behind a plain mutex that is never held across an
//! `.await`. The write half has its own async mutex so a pending read never
//! blocks a command. A failure in either background task (EOF, I/O error,
//! watchdog) is delivered once through the receiver returned by the
//! constructor, and the driver shuts itself down.
//!
//! # Example
//!
//! ```rust,no_run
//! use rotator_hub::config::{Endpoint, Gs232Settings, RotatorConfig};
//! use rotator_hub::hal::Gs232Rotator;
//! use rotator_hub::traits::{EventSink, Rotator};
//!
//! # async fn example() -> rotator_hub::Result<()> {
//! let config = RotatorConfig::builder("roof").with_azimuth_range(0, 450).build()?;
//! let settings = Gs232Settings::default().with_endpoint(Endpoint::parse("/dev/ttyUSB0"));
//!
//! let (rotator, fatal) = Gs232Rotator::connect(config, settings, EventSink::default()).await?;
//! rotator.set_azimuth(270).await?;
//!
//! let err = fatal.await;
//! eprintln!("rotator gone: {err:?}");
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::codec::{self, Command};
use crate::config::{Gs232Settings, RotatorConfig};
use crate::error::{Error, Result};
use crate::hal::transport::{self, BoxedReader, BoxedWriter};
use crate::messages::Heading;
use crate::traits::{EventSink, Rotator};

/// Deadline for one command write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// State
// ============================================================================

struct State {
    heading: Heading,
    az_initialized: bool,
    el_initialized: bool,
    last_rx: Instant,
    closed: bool,
    fatal: Option<oneshot::Sender<Error>>,
}

// ============================================================================
// Driver
// ============================================================================

/// A GS232 controller on a serial line or TCP bridge.
pub struct Gs232Rotator {
    config: RotatorConfig,
    settings: Gs232Settings,
    state: Mutex<State>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    shutdown: CancellationToken,
    sink: EventSink,
}

impl Gs232Rotator {
    /// Open the configured endpoint and start polling.
    ///
    /// Fails without creating a driver if the port can't be opened.
    pub async fn connect(
        config: RotatorConfig,
        settings: Gs232Settings,
        sink: EventSink,
    ) -> Result<(Arc<Self>, oneshot::Receiver<Error>)> {
        let (reader, writer) = transport::open(&settings).await?;
        log::info!("{}: connected to {}", config.name, settings.endpoint);
        Ok(Self::with_transport(config, settings, reader, writer, sink))
    }

    /// Start a driver on an already open byte stream.
    ///
    /// Must be called inside a tokio runtime.
    pub fn with_transport<R, W>(
        config: RotatorConfig,
        settings: Gs232Settings,
        reader: R,
        writer: W,
        sink: EventSink,
    ) -> (Arc<Self>, oneshot::Receiver<Error>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (fatal_tx, fatal_rx) = oneshot::channel();
        let rotator = Arc::new(Self {
            config,
            settings,
            state: Mutex::new(State {
                heading: Heading::default(),
                az_initialized: false,
                el_initialized: false,
                last_rx: Instant::now(),
                closed: false,
                fatal: Some(fatal_tx),
            }),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            shutdown: CancellationToken::new(),
            sink,
        });

        tokio::spawn(Arc::clone(&rotator).read_loop(Box::new(reader)));
        tokio::spawn(Arc::clone(&rotator).poll_loop());

        (rotator, fatal_rx)
    }

    /// Settings the driver was started with.
    pub fn settings(&self) -> &Gs232Settings {
        &self.settings
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    // ------------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------------

    async fn read_loop(self: Arc<Self>, reader: BoxedReader) {
        let codec = AnyDelimiterCodec::new_with_max_length(
            b"\r\n".to_vec(),
            Vec::new(),
            codec::MAX_LINE_LEN,
        );
        let mut lines = FramedRead::new(reader, codec);

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                next = lines.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if !chunk.is_empty() {
                        self.handle_line(&String::from_utf8_lossy(&chunk));
                    }
                }
                Some(Err(AnyDelimiterCodecError::Io(e))) => {
                    self.fail(Error::Io(e)).await;
                    return;
                }
                Some(Err(e)) => {
                    self.fail(Error::Protocol(e.to_string())).await;
                    return;
                }
                None => {
                    self.fail(Error::ConnectionLost).await;
                    return;
                }
            }
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        let period = self.settings.polling_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.send(Command::Query).await {
                self.fail(e).await;
                return;
            }

            let silence = self.with_state(|s| s.last_rx.elapsed());
            if silence >= self.settings.watchdog_timeout() {
                self.fail(Error::WatchdogExpired(silence)).await;
                return;
            }
        }
    }

    /// Apply one line of controller output.
    fn handle_line(&self, line: &str) {
        let parsed = codec::parse_line(line);
        log::trace!("{}: rx {:?} -> {:?}", self.config.name, line, parsed);

        self.with_state(|s| {
            s.last_rx = Instant::now();
            let mut changed = false;

            if let Some(az) = parsed.azimuth {
                if !s.az_initialized {
                    s.heading.az_preset = az;
                    s.az_initialized = true;
                    changed = true;
                }
                if s.heading.azimuth != az {
                    s.heading.azimuth = az;
                    changed = true;
                }
            }

            if let Some(el) = parsed.elevation {
                if !s.el_initialized {
                    s.heading.el_preset = el;
                    s.el_initialized = true;
                    changed = true;
                }
                if s.heading.elevation != el {
                    s.heading.elevation = el;
                    changed = true;
                }
            }

            if changed {
                self.sink.publish(&self.config.name, s.heading);
            }
        });
    }

    async fn fail(&self, err: Error) {
        let Some(tx) = self.with_state(|s| if s.closed { None } else { s.fatal.take() }) else {
            return;
        };
        log::error!("{}: {}", self.config.name, err);
        self.close().await;
        let _ = tx.send(err);
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    async fn send(&self, cmd: Command) -> Result<()> {
        let line = cmd.encode(self.settings.dialect);
        let mut writer = self.writer.lock().await;
        let w = writer.as_mut().ok_or(Error::Closed)?;

        let write = async {
            w.write_all(line.as_bytes()).await?;
            w.flush().await
        };
        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
            Ok(res) => res.map_err(Error::from),
            Err(_) => Err(Error::Transport(format!(
                "write to {} timed out",
                self.settings.endpoint
            ))),
        }
    }

    /// Update state under the lock and publish if the heading changed.
    fn update(&self, f: impl FnOnce(&mut Heading)) -> Result<Heading> {
        self.with_state(|s| {
            if s.closed {
                return Err(Error::Closed);
            }
            let before = s.heading;
            f(&mut s.heading);
            if s.heading != before {
                self.sink.publish(&self.config.name, s.heading);
            }
            Ok(s.heading)
        })
    }
}

#[async_trait]
impl Rotator for Gs232Rotator {
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
        self.update(|h| h.az_preset = az)?;
        self.send(Command::SetAzimuth(az)).await
    }

    async fn set_elevation(&self, elevation: i32) -> Result<()> {
        if !self.config.has_elevation {
            return Ok(());
        }
        let el = self.config.clamp_elevation(elevation);
        let heading = self.update(|h| h.el_preset = el)?;
        self.send(Command::SetElevation {
            elevation: el,
            azimuth: heading.az_preset,
        })
        .await
    }

    async fn stop_azimuth(&self) -> Result<()> {
        if !self.config.has_azimuth {
            return Ok(());
        }
        self.update(|h| h.az_preset = h.azimuth)?;
        self.send(Command::StopAzimuth).await
    }

    async fn stop_elevation(&self) -> Result<()> {
        if !self.config.has_elevation {
            return Ok(());
        }
        self.update(|h| h.el_preset = h.elevation)?;
        self.send(Command::StopElevation).await
    }

    async fn stop(&self) -> Result<()> {
        self.update(|h| {
            h.az_preset = h.azimuth;
            h.el_preset = h.elevation;
        })?;
        self.send(Command::Stop).await
    }

    async fn close(&self) {
        let first = self.with_state(|s| !std::mem::replace(&mut s.closed, true));
        if !first {
            return;
        }

        self.shutdown.cancel();
        let writer = self.writer.lock().await.take();
        if let Some(mut w) = writer {
            let _ = w.shutdown().await;
        }
        log::info!("{}: closed", self.config.name);
    }
}
