//! JSON-over-WebSocket client protocol.
//!
//! On connect a client receives one `add` event per registered rotator,
//! then every subsequent [`Event`]. It sends [`Request`]s naming the rotator
//! to act on. The server pings every `ping_period`; a connection silent for
//! `pong_wait` is dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::messages::{Event, Request};
use crate::traits::Rotator;

use super::hub::{Client, ClientKind, Hub};

/// Write half of one WebSocket connection.
pub struct WsClient {
    id: u64,
    peer: String,
    sink: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
    write_wait: Duration,
}

impl WsClient {
    fn new(
        id: u64,
        peer: String,
        sink: SplitSink<WebSocket, Message>,
        write_wait: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer,
            sink: tokio::sync::Mutex::new(sink),
            write_wait,
        })
    }

    async fn write(&self, msg: Message) -> Result<()> {
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_wait, sink.send(msg)).await {
            Ok(res) => res.map_err(|e| Error::Transport(e.to_string())),
            Err(_) => Err(Error::Transport(format!("write to {} timed out", self.peer))),
        }
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = tokio::time::timeout(self.write_wait, sink.close()).await;
    }
}

#[async_trait]
impl Client for WsClient {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> ClientKind {
        ClientKind::WebSocket
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    async fn send(&self, event: &Event) -> Result<()> {
        let text = serde_json::to_string(event).map_err(|e| Error::Protocol(e.to_string()))?;
        self.write(Message::Text(text)).await
    }
}

/// GET /ws - upgrade to the event stream.
pub async fn ws_handler(
    State(hub): State<Arc<Hub>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = connect.map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.to_string());
    ws.on_upgrade(move |socket| handle_socket(hub, socket, peer))
}

async fn handle_socket(hub: Arc<Hub>, socket: WebSocket, peer: String) {
    let timing = hub.ws_config().clone();
    let (sink, mut stream) = socket.split();
    let client = WsClient::new(hub.next_client_id(), peer, sink, timing.write_wait);

    // queues an `add` per registered rotator ahead of any later event
    let done = hub.add_client(client.clone());
    let pinger = tokio::spawn(ping_loop(Arc::clone(&client), timing.ping_period, done.clone()));

    loop {
        let next = tokio::select! {
            biased;
            _ = done.cancelled() => break,
            next = tokio::time::timeout(timing.pong_wait, stream.next()) => next,
        };
        match next {
            Err(_) => {
                log::warn!("{}: no frame within {:?}, closing", client.peer, timing.pong_wait);
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(e))) => {
                log::warn!("{}: read failed: {e}", client.peer);
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => handle_request(&hub, &client.peer, &text).await,
            Ok(Some(Ok(_))) => {}
        }
    }

    hub.remove_client(client.id);
    done.cancel();
    let _ = pinger.await;
    client.close().await;
}

async fn ping_loop(client: Arc<WsClient>, period: Duration, done: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = done.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Err(e) = client.write(Message::Ping(Vec::new())).await {
            log::warn!("{}: ping failed: {e}", client.peer);
            done.cancel();
            return;
        }
    }
}

/// Dispatch one client request to the named rotator.
async fn handle_request(hub: &Hub, peer: &str, text: &str) {
    let req: Request = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            log::warn!("{peer}: invalid request: {e}");
            return;
        }
    };

    let Some(rotator) = hub.rotator(&req.name) else {
        log::warn!("{peer}: unable to find rotator {}", req.name);
        return;
    };

    if let Err(e) = rotator.execute_request(&req).await {
        log::warn!("{peer}: request for {} failed: {e}", req.name);
    }
}
