//! Registry of named rotators and the clients watching them.
//!
//! The [`Hub`] owns one map of rotators and one set of connected clients,
//! both behind a single `RwLock`. Heading updates published by drivers into
//! the hub's [`EventSink`] are picked up by a dispatcher task and fanned out
//! with [`Hub::broadcast`].
//!
//! Every client gets its own bounded queue drained by a writer task, so a
//! slow connection only ever delays itself. A client whose write fails, or
//! whose queue overflows, is disconnected: the [`CancellationToken`] handed
//! out by [`Hub::add_client`] fires and the connection's read loop ends.
//!
//! # Example
//!
//! ```ignore
//! use rotator_hub::services::Hub;
//!
//! let hub = Hub::new(EventSink::default(), WsConfig::default());
//! let (rotator, fatal) = Gs232Rotator::connect(config, settings, hub.sink()).await?;
//! hub.add_rotator(rotator).await?;
//! let supervisor = hub.supervise("roof", fatal);
//! ```
//!
//! The hub lock is never held across an `.await`: accessors clone `Arc`s
//! out of the registry and release it before any I/O happens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WsConfig;
use crate::error::{Error, Result};
use crate::messages::Event;
use crate::traits::{EventSink, HeadingUpdate, Rotator};

/// Events buffered per client before it counts as stalled.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// Clients
// ============================================================================

/// Which listener a client came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// GS232 emulation over TCP.
    Tcp,
    /// JSON over WebSocket.
    WebSocket,
}

/// One connected client, as seen by the hub.
///
/// The hub calls `send` from a single writer task per client. The
/// connection itself must end once the token returned by
/// [`Hub::add_client`] is cancelled.
#[async_trait]
pub trait Client: Send + Sync {
    /// Hub-assigned identifier.
    fn id(&self) -> u64;

    /// Listener type.
    fn kind(&self) -> ClientKind;

    /// Remote address, for logs.
    fn peer(&self) -> &str;

    /// Whether this client wants `event` at all.
    fn accepts(&self, _event: &Event) -> bool {
        true
    }

    /// Write one event, honoring the client's write deadline.
    async fn send(&self, event: &Event) -> Result<()>;
}

struct ClientEntry {
    client: Arc<dyn Client>,
    queue: mpsc::Sender<Event>,
    token: CancellationToken,
}

// ============================================================================
// Hub
// ============================================================================

struct Entry {
    rotator: Arc<dyn Rotator>,
    seq: u64,
}

#[derive(Default)]
struct Registry {
    rotators: HashMap<String, Entry>,
    next_seq: u64,
    clients: HashMap<u64, ClientEntry>,
}

impl Registry {
    /// Queue `event` for every interested client; returns the ones that overflowed.
    fn fan_out(&self, event: &Event) -> Vec<u64> {
        self.clients
            .iter()
            .filter(|(_, c)| c.client.accepts(event))
            .filter_map(|(id, c)| match c.queue.try_send(event.clone()) {
                Err(TrySendError::Full(_)) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

/// Rotator registry plus client fan-out.
pub struct Hub {
    registry: RwLock<Registry>,
    next_client: AtomicU64,
    sink: EventSink,
    ws: WsConfig,
}

impl Hub {
    /// Create a hub and start its dispatcher.
    ///
    /// Drivers registered with this hub must publish into [`Hub::sink`].
    pub fn new(sink: EventSink, ws: WsConfig) -> Arc<Self> {
        let hub = Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            next_client: AtomicU64::new(1),
            sink,
            ws,
        });

        let rx = hub.sink.subscribe();
        tokio::spawn(dispatch(Arc::downgrade(&hub), rx));
        hub
    }

    /// Sink that drivers publish heading updates into.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// WebSocket timing used by the WebSocket listener.
    pub fn ws_config(&self) -> &WsConfig {
        &self.ws
    }

    fn read<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        let guard = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let mut guard = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    // ------------------------------------------------------------------------
    // Rotators
    // ------------------------------------------------------------------------

    /// Register a rotator under its name.
    ///
    /// Fails with [`Error::DuplicateRotator`] if the name is taken; the first
    /// registration stays untouched. WebSocket clients are told about it.
    pub async fn add_rotator(&self, rotator: Arc<dyn Rotator>) -> Result<()> {
        let name = rotator.name().to_string();
        let stalled = self.write(|r| {
            if r.rotators.contains_key(&name) {
                return Err(Error::DuplicateRotator(name.clone()));
            }
            let seq = r.next_seq;
            r.next_seq += 1;
            r.rotators.insert(name.clone(), Entry { rotator, seq });
            Ok(r.fan_out(&Event::add(name.as_str())))
        })?;

        log::info!("added rotator {name}");
        self.drop_stalled(stalled);
        Ok(())
    }

    /// Deregister a rotator, tell every client and close its driver.
    pub async fn remove_rotator(&self, name: &str) -> Result<()> {
        let (entry, stalled) = self
            .write(|r| {
                let entry = r.rotators.remove(name)?;
                Some((entry, r.fan_out(&Event::remove(name))))
            })
            .ok_or_else(|| Error::UnknownRotator(name.to_string()))?;

        self.drop_stalled(stalled);
        entry.rotator.close().await;
        log::info!("removed rotator {name}");
        Ok(())
    }

    /// Look up a rotator by name.
    pub fn rotator(&self, name: &str) -> Option<Arc<dyn Rotator>> {
        self.read(|r| r.rotators.get(name).map(|e| Arc::clone(&e.rotator)))
    }

    /// All rotators in registration order.
    pub fn rotators(&self) -> Vec<Arc<dyn Rotator>> {
        let mut entries = self.read(|r| {
            r.rotators
                .values()
                .map(|e| (e.seq, Arc::clone(&e.rotator)))
                .collect::<Vec<_>>()
        });
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, r)| r).collect()
    }

    /// The earliest registered rotator still present.
    pub fn first_rotator(&self) -> Option<Arc<dyn Rotator>> {
        self.read(|r| {
            r.rotators
                .values()
                .min_by_key(|e| e.seq)
                .map(|e| Arc::clone(&e.rotator))
        })
    }

    /// Deregister `name` once its driver reports a fatal error.
    ///
    /// The task resolves to the error, or `None` if the driver was closed
    /// without one.
    pub fn supervise(
        self: &Arc<Self>,
        name: impl Into<String>,
        fatal: oneshot::Receiver<Error>,
    ) -> JoinHandle<Option<Error>> {
        let hub = Arc::clone(self);
        let name = name.into();
        tokio::spawn(async move {
            let err = fatal.await.ok()?;
            log::error!("rotator {name} failed: {err}");
            if let Err(e) = hub.remove_rotator(&name).await {
                log::debug!("{e}");
            }
            Some(err)
        })
    }

    // ------------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------------

    /// Allocate an identifier for a new client.
    pub fn next_client_id(&self) -> u64 {
        self.next_client.fetch_add(1, Ordering::Relaxed)
    }

    /// Start delivering events to `client`.
    ///
    /// The client first gets an `add` event for every registered rotator it
    /// accepts, queued under the same lock that registers it. The returned
    /// token is cancelled when the hub disconnects the client.
    pub fn add_client(self: &Arc<Self>, client: Arc<dyn Client>) -> CancellationToken {
        let token = CancellationToken::new();

        let queue = self.write(|r| {
            let mut existing: Vec<_> = r.rotators.iter().map(|(name, e)| (e.seq, name)).collect();
            existing.sort_by_key(|(seq, _)| *seq);

            let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY + existing.len());
            for (_, name) in existing {
                let event = Event::add(name.as_str());
                if client.accepts(&event) {
                    let _ = tx.try_send(event);
                }
            }

            r.clients.insert(
                client.id(),
                ClientEntry {
                    client: Arc::clone(&client),
                    queue: tx,
                    token: token.clone(),
                },
            );
            rx
        });

        log::info!("{:?} client {} connected", client.kind(), client.peer());
        tokio::spawn(write_loop(Arc::downgrade(self), client, queue, token.clone()));
        token
    }

    /// Stop delivering events to client `id` and disconnect it. Unknown ids
    /// are ignored.
    pub fn remove_client(&self, id: u64) {
        if let Some(c) = self.write(|r| r.clients.remove(&id)) {
            c.token.cancel();
            log::info!("{:?} client {} disconnected", c.client.kind(), c.client.peer());
        }
    }

    /// Number of connected clients of `kind`.
    pub fn client_count(&self, kind: ClientKind) -> usize {
        self.read(|r| r.clients.values().filter(|c| c.client.kind() == kind).count())
    }

    /// Queue `event` for every interested client. Never waits on a client.
    ///
    /// A client whose queue is full is disconnected; the others are
    /// unaffected.
    pub fn broadcast(&self, event: Event) {
        let stalled = self.read(|r| r.fan_out(&event));
        self.drop_stalled(stalled);
    }

    fn drop_stalled(&self, ids: Vec<u64>) {
        for id in ids {
            log::warn!("client {id} is not keeping up");
            self.remove_client(id);
        }
    }
}

/// Drain one client's queue until it fails or is disconnected.
async fn write_loop(
    hub: Weak<Hub>,
    client: Arc<dyn Client>,
    mut queue: mpsc::Receiver<Event>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return,
            event = queue.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        if let Err(e) = client.send(&event).await {
            log::warn!("dropping {:?} client {}: {e}", client.kind(), client.peer());
            match hub.upgrade() {
                Some(hub) => hub.remove_client(client.id()),
                None => token.cancel(),
            }
            return;
        }
    }
}

async fn dispatch(hub: Weak<Hub>, mut rx: broadcast::Receiver<HeadingUpdate>) {
    loop {
        let update = match rx.recv().await {
            Ok(update) => update,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("hub dispatcher lagged, {n} heading updates dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let Some(hub) = hub.upgrade() else {
            return;
        };
        hub.broadcast(Event::heading(update.rotator_name, update.heading));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockRotator;
    use crate::messages::{EventKind, Heading};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    struct Recorder {
        id: u64,
        kind: ClientKind,
        failing: bool,
        delay: Duration,
        events: Mutex<Vec<Event>>,
        received_at: Mutex<Vec<Instant>>,
    }

    impl Recorder {
        fn new(id: u64, kind: ClientKind, failing: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                kind,
                failing,
                delay: Duration::ZERO,
                events: Mutex::new(Vec::new()),
                received_at: Mutex::new(Vec::new()),
            })
        }

        fn slow(id: u64, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id,
                kind: ClientKind::WebSocket,
                failing: false,
                delay,
                events: Mutex::new(Vec::new()),
                received_at: Mutex::new(Vec::new()),
            })
        }

        fn kinds(&self) -> Vec<EventKind> {
            self.events.lock().unwrap().iter().map(|e| e.name).collect()
        }
    }

    #[async_trait]
    impl Client for Recorder {
        fn id(&self) -> u64 {
            self.id
        }
        fn kind(&self) -> ClientKind {
            self.kind
        }
        fn peer(&self) -> &str {
            "test"
        }
        fn accepts(&self, event: &Event) -> bool {
            self.kind == ClientKind::WebSocket || event.name == EventKind::Heading
        }
        async fn send(&self, event: &Event) -> Result<()> {
            if self.failing {
                return Err(Error::ConnectionLost);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.events.lock().unwrap().push(event.clone());
            self.received_at.lock().unwrap().push(Instant::now());
            Ok(())
        }
    }

    fn hub() -> Arc<Hub> {
        Hub::new(EventSink::default(), WsConfig::default())
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    // ========================================================================
    // Registry
    // ========================================================================

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let hub = hub();
        let first = MockRotator::new("roof");
        hub.add_rotator(first.clone()).await.unwrap();

        let err = hub.add_rotator(MockRotator::new("roof")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateRotator(ref n) if n == "roof"));

        first.set_position(77, 0);
        assert_eq!(hub.rotator("roof").unwrap().azimuth(), 77);
        assert_eq!(hub.rotators().len(), 1);
    }

    #[tokio::test]
    async fn test_registration_order() {
        let hub = hub();
        for name in ["c", "a", "b"] {
            hub.add_rotator(MockRotator::new(name)).await.unwrap();
        }
        let names: Vec<_> = hub.rotators().iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, ["c", "a", "b"]);
        assert_eq!(hub.first_rotator().unwrap().name(), "c");

        hub.remove_rotator("c").await.unwrap();
        assert_eq!(hub.first_rotator().unwrap().name(), "a");
    }

    #[tokio::test]
    async fn test_remove_closes_and_notifies() {
        let hub = hub();
        let rotator = MockRotator::new("roof");
        hub.add_rotator(rotator.clone()).await.unwrap();

        let ws = Recorder::new(hub.next_client_id(), ClientKind::WebSocket, false);
        hub.add_client(ws.clone());

        hub.remove_rotator("roof").await.unwrap();
        assert_eq!(rotator.close_count(), 1);
        assert!(hub.rotator("roof").is_none());
        eventually(|| ws.kinds() == [EventKind::Add, EventKind::Remove]).await;

        assert!(matches!(
            hub.remove_rotator("roof").await,
            Err(Error::UnknownRotator(_))
        ));
    }

    // ========================================================================
    // Clients
    // ========================================================================

    #[tokio::test]
    async fn test_new_client_told_about_existing_rotators() {
        let hub = hub();
        for name in ["b", "a"] {
            hub.add_rotator(MockRotator::new(name)).await.unwrap();
        }
        let tcp = Recorder::new(1, ClientKind::Tcp, false);
        let ws = Recorder::new(2, ClientKind::WebSocket, false);
        hub.add_client(tcp.clone());
        hub.add_client(ws.clone());

        hub.add_rotator(MockRotator::new("c")).await.unwrap();

        eventually(|| ws.events.lock().unwrap().len() == 3).await;
        let names: Vec<_> = ws.events.lock().unwrap().iter().map(|e| e.rotator_name.clone()).collect();
        assert_eq!(names, ["b", "a", "c"]);
        assert_eq!(ws.kinds(), vec![EventKind::Add; 3]);
        assert!(tcp.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_remove_client_cancels_token() {
        let hub = hub();
        let ws = Recorder::new(7, ClientKind::WebSocket, false);
        let token = hub.add_client(ws);
        assert_eq!(hub.client_count(ClientKind::WebSocket), 1);

        hub.remove_client(7);
        hub.remove_client(7);
        assert!(token.is_cancelled());
        assert_eq!(hub.client_count(ClientKind::WebSocket), 0);
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    #[tokio::test]
    async fn test_failing_client_disconnected_others_served() {
        let hub = hub();
        let good = Recorder::new(1, ClientKind::WebSocket, false);
        let bad = Recorder::new(2, ClientKind::WebSocket, true);
        let good2 = Recorder::new(3, ClientKind::Tcp, false);
        let good_token = hub.add_client(good.clone());
        let bad_token = hub.add_client(bad.clone());
        hub.add_client(good2.clone());

        hub.broadcast(Event::heading("roof", Heading::default()));

        eventually(|| bad_token.is_cancelled()).await;
        eventually(|| good.kinds().len() == 1 && good2.kinds().len() == 1).await;
        assert_eq!(hub.client_count(ClientKind::WebSocket), 1);
        assert_eq!(hub.client_count(ClientKind::Tcp), 1);
        assert!(!good_token.is_cancelled());

        hub.broadcast(Event::heading("roof", Heading::default()));
        eventually(|| good.kinds().len() == 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_client_does_not_delay_others() {
        let hub = hub();
        let slow = Recorder::slow(1, Duration::from_secs(4));
        let fast = Recorder::new(2, ClientKind::WebSocket, false);
        hub.add_client(slow.clone());
        hub.add_client(fast.clone());

        let start = Instant::now();
        for az in 0..3 {
            hub.broadcast(Event::heading("roof", Heading { azimuth: az, ..Default::default() }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(fast.kinds().len(), 3);
        for at in fast.received_at.lock().unwrap().iter() {
            assert!(at.duration_since(start) < Duration::from_millis(10));
        }
        assert!(slow.kinds().is_empty());
        assert_eq!(hub.client_count(ClientKind::WebSocket), 2);
    }

    #[tokio::test]
    async fn test_overflowing_client_disconnected() {
        let hub = hub();
        let stuck = Recorder::slow(1, Duration::from_secs(3600));
        let token = hub.add_client(stuck);

        for _ in 0..=CLIENT_QUEUE_CAPACITY {
            hub.broadcast(Event::heading("roof", Heading::default()));
        }

        assert!(token.is_cancelled());
        assert_eq!(hub.client_count(ClientKind::WebSocket), 0);
    }

    #[tokio::test]
    async fn test_sink_updates_reach_clients() {
        let hub = hub();
        let ws = Recorder::new(1, ClientKind::WebSocket, false);
        hub.add_client(ws.clone());

        let heading = Heading { azimuth: 42, ..Default::default() };
        hub.sink().publish("roof", heading);

        eventually(|| !ws.kinds().is_empty()).await;
        let events = ws.events.lock().unwrap().clone();
        assert_eq!(events, vec![Event::heading("roof", heading)]);
    }

    // ========================================================================
    // Supervision
    // ========================================================================

    #[tokio::test]
    async fn test_supervise_deregisters_on_fatal() {
        let hub = hub();
        let rotator = MockRotator::new("roof");
        hub.add_rotator(rotator.clone()).await.unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = hub.supervise("roof", rx);
        tx.send(Error::ConnectionLost).unwrap();

        let err = handle.await.unwrap();
        assert!(matches!(err, Some(Error::ConnectionLost)));
        assert!(hub.rotator("roof").is_none());
        assert_eq!(rotator.close_count(), 1);
    }

    #[tokio::test]
    async fn test_supervise_quiet_on_clean_close() {
        let hub = hub();
        hub.add_rotator(MockRotator::new("roof")).await.unwrap();

        let (tx, rx) = oneshot::channel::<Error>();
        let handle = hub.supervise("roof", rx);
        drop(tx);

        assert!(handle.await.unwrap().is_none());
        assert!(hub.rotator("roof").is_some());
    }
}
