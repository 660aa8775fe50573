//! Proxy driver for a rotator served by another hub.
//!
//! Built from a `(host, port)` pair, typically found by LAN discovery. The
//! remote hub must serve exactly one rotator. Its metadata comes from
//! `GET /api/rotators`, heading updates arrive over `/ws`, and every command
//! becomes an HTTP `PUT` against the remote API.
//!
//! Losing the WebSocket (close, error, or no frame within the pong wait) is
//! fatal: the fatal receiver fires and the proxy shuts down, so the owner can
//! deregister it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::{RotatorConfig, WsConfig};
use crate::error::{Error, Result};
use crate::messages::{AzimuthPut, ElevationPut, Event, EventKind, Heading, RotatorObjects};
use crate::traits::{EventSink, Rotator};

/// Deadline for one HTTP request to the remote hub.
const HTTP_TIMEOUT: Duration = Duration::from_secs(3);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

struct State {
    heading: Heading,
    closed: bool,
    fatal: Option<oneshot::Sender<Error>>,
}

/// A rotator living on another hub.
pub struct RemoteRotator {
    config: RotatorConfig,
    base_url: String,
    http: reqwest::Client,
    keepalive: WsConfig,
    state: Mutex<State>,
    ws: tokio::sync::Mutex<Option<WsWriter>>,
    shutdown: CancellationToken,
    sink: EventSink,
}

impl RemoteRotator {
    /// Fetch metadata from the hub at `host:port` and subscribe to its events.
    pub async fn connect(
        host: &str,
        port: u16,
        sink: EventSink,
    ) -> Result<(Arc<Self>, oneshot::Receiver<Error>)> {
        Self::connect_with(host, port, WsConfig::default(), sink).await
    }

    /// Like [`connect`](Self::connect) with custom keepalive timing.
    pub async fn connect_with(
        host: &str,
        port: u16,
        keepalive: WsConfig,
        sink: EventSink,
    ) -> Result<(Arc<Self>, oneshot::Receiver<Error>)> {
        keepalive.validate()?;
        let base_url = format!("http://{host}:{port}");
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(remote_err)?;

        let objects: RotatorObjects = http
            .get(format!("{base_url}/api/rotators"))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(remote_err)?
            .json()
            .await
            .map_err(remote_err)?;

        if objects.len() != 1 {
            return Err(Error::Remote(format!(
                "{base_url} serves {} rotators, expected exactly one",
                objects.len()
            )));
        }
        let Some(object) = objects.into_values().next() else {
            return Err(Error::Remote(format!("{base_url} serves no rotator")));
        };

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{host}:{port}/ws"))
            .await
            .map_err(remote_err)?;
        let (writer, reader) = ws.split();

        let mut config = object.config;
        config.name = object.name;
        log::info!("{}: mirroring rotator at {base_url}", config.name);

        let (fatal_tx, fatal_rx) = oneshot::channel();
        let rotator = Arc::new(Self {
            config,
            base_url,
            http,
            keepalive,
            state: Mutex::new(State {
                heading: object.heading,
                closed: false,
                fatal: Some(fatal_tx),
            }),
            ws: tokio::sync::Mutex::new(Some(writer)),
            shutdown: CancellationToken::new(),
            sink,
        });

        tokio::spawn(Arc::clone(&rotator).read_loop(reader));
        tokio::spawn(Arc::clone(&rotator).ping_loop());

        Ok((rotator, fatal_rx))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    async fn read_loop(self: Arc<Self>, mut reader: WsReader) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                next = tokio::time::timeout(self.keepalive.pong_wait, reader.next()) => next,
            };

            let msg = match next {
                Err(_) => {
                    self.fail(Error::Remote("websocket timed out".into())).await;
                    return;
                }
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {
                    self.fail(Error::ConnectionLost).await;
                    return;
                }
                Ok(Some(Err(e))) => {
                    self.fail(remote_err(e)).await;
                    return;
                }
                Ok(Some(Ok(msg))) => msg,
            };

            let Message::Text(text) = msg else {
                continue;
            };
            let event: Event = match serde_json::from_str(&text) {
                Ok(ev) => ev,
                Err(e) => {
                    log::warn!("{}: bad event from remote: {e}", self.config.name);
                    continue;
                }
            };
            if event.rotator_name != self.config.name {
                continue;
            }

            match event.name {
                EventKind::Heading => self.apply(event.heading),
                EventKind::Remove => {
                    self.fail(Error::ConnectionLost).await;
                    return;
                }
                EventKind::Add => {}
            }
        }
    }

    async fn ping_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.keepalive.ping_period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.send_ws(Message::Ping(Vec::new())).await {
                self.fail(e).await;
                return;
            }
        }
    }

    async fn send_ws(&self, msg: Message) -> Result<()> {
        let mut ws = self.ws.lock().await;
        let writer = ws.as_mut().ok_or(Error::Closed)?;
        match tokio::time::timeout(self.keepalive.write_wait, writer.send(msg)).await {
            Ok(res) => res.map_err(remote_err),
            Err(_) => Err(Error::Remote("websocket write timed out".into())),
        }
    }

    fn apply(&self, heading: Heading) {
        self.with_state(|s| {
            if s.heading != heading {
                s.heading = heading;
                self.sink.publish(&self.config.name, heading);
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

    async fn put<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<()> {
        if self.with_state(|s| s.closed) {
            return Err(Error::Closed);
        }
        let url = format!("{}/api/rotator/{}/{endpoint}", self.base_url, self.config.name);
        let resp = self.http.put(url).json(body).send().await.map_err(remote_err)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Error::Remote(format!("{status}: {text}")))
    }
}

fn remote_err(e: impl std::fmt::Display) -> Error {
    Error::Remote(e.to_string())
}

#[derive(Serialize)]
struct Empty {}

#[async_trait]
impl Rotator for RemoteRotator {
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
        let azimuth = Some(self.config.clamp_azimuth(azimuth));
        self.put("azimuth", &AzimuthPut { azimuth }).await
    }

    async fn set_elevation(&self, elevation: i32) -> Result<()> {
        if !self.config.has_elevation {
            return Ok(());
        }
        let elevation = Some(self.config.clamp_elevation(elevation));
        self.put("elevation", &ElevationPut { elevation }).await
    }

    async fn stop_azimuth(&self) -> Result<()> {
        if !self.config.has_azimuth {
            return Ok(());
        }
        self.put("stop_azimuth", &Empty {}).await
    }

    async fn stop_elevation(&self) -> Result<()> {
        if !self.config.has_elevation {
            return Ok(());
        }
        self.put("stop_elevation", &Empty {}).await
    }

    async fn stop(&self) -> Result<()> {
        self.put("stop", &Empty {}).await
    }

    async fn close(&self) {
        if self.with_state(|s| std::mem::replace(&mut s.closed, true)) {
            return;
        }
        self.shutdown.cancel();
        let writer = self.ws.lock().await.take();
        if let Some(mut w) = writer {
            let _ = tokio::time::timeout(self.keepalive.write_wait, w.close()).await;
        }
        log::info!("{}: disconnected from {}", self.config.name, self.base_url);
    }
}
