//! GS232 emulation over TCP.
//!
//! Tracking programs that speak to a Yaesu controller can point at this
//! listener instead. Each connection is bound to the first-registered
//! rotator at connect time and receives its heading as `+0AAA+0EEE\r\n`
//! whenever it changes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};

use crate::codec::{format_position, ClientCommand, MAX_LINE_LEN, PROMPT};
use crate::config::TcpConfig;
use crate::error::{Error, Result};
use crate::hal::transport::BoxedWriter;
use crate::messages::{Event, EventKind};
use crate::traits::Rotator;

use super::hub::{Client, ClientKind, Hub};

// ============================================================================
// Client Handle
// ============================================================================

/// Write half of one GS232 connection.
pub struct TcpClient {
    id: u64,
    peer: String,
    rotator_name: String,
    writer: tokio::sync::Mutex<BoxedWriter>,
    write_wait: Duration,
}

impl TcpClient {
    /// Wrap a write half. `rotator_name` is the rotator this client follows.
    pub fn new<W>(
        id: u64,
        peer: impl Into<String>,
        rotator_name: impl Into<String>,
        writer: W,
        write_wait: Duration,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id,
            peer: peer.into(),
            rotator_name: rotator_name.into(),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            write_wait,
        })
    }

    /// Rotator this client follows.
    pub fn rotator_name(&self) -> &str {
        &self.rotator_name
    }

    /// Write raw text within the write deadline.
    pub async fn write_str(&self, text: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.write_wait, write).await {
            Ok(res) => res.map_err(Error::Io),
            Err(_) => Err(Error::Transport(format!("write to {} timed out", self.peer))),
        }
    }

    async fn shutdown(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

#[async_trait]
impl Client for TcpClient {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> ClientKind {
        ClientKind::Tcp
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn accepts(&self, event: &Event) -> bool {
        event.name == EventKind::Heading && event.rotator_name == self.rotator_name
    }

    async fn send(&self, event: &Event) -> Result<()> {
        let h = &event.heading;
        self.write_str(&format_position(h.azimuth, Some(h.elevation)))
            .await
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Bind `config`'s address and serve until the listener fails.
pub async fn run_tcp_server(hub: Arc<Hub>, config: &TcpConfig) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    log::info!("GS232 listener on {}", listener.local_addr()?);
    serve_tcp(hub, listener, config.clone()).await
}

/// Accept connections forever, one task each.
pub async fn serve_tcp(hub: Arc<Hub>, listener: TcpListener, config: TcpConfig) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("accept failed: {e}");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("{peer}: set_nodelay: {e}");
        }
        let (reader, writer) = stream.into_split();
        tokio::spawn(handle_connection(
            Arc::clone(&hub),
            reader,
            writer,
            peer.to_string(),
            config.write_wait,
        ));
    }
}

/// Run the command loop for one connection until EOF, a write failure or
/// the hub disconnecting it.
pub async fn handle_connection<R, W>(
    hub: Arc<Hub>,
    reader: R,
    mut writer: W,
    peer: String,
    write_wait: Duration,
) where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let Some(rotator) = hub.first_rotator() else {
        log::warn!("{peer}: no rotator registered, closing connection");
        let _ = writer.shutdown().await;
        return;
    };

    let client = TcpClient::new(hub.next_client_id(), peer, rotator.name(), writer, write_wait);
    let disconnected = hub.add_client(client.clone());

    let codec = AnyDelimiterCodec::new_with_max_length(b"\r\n".to_vec(), Vec::new(), MAX_LINE_LEN);
    let mut lines = FramedRead::new(reader, codec);

    loop {
        let next = tokio::select! {
            biased;
            _ = disconnected.cancelled() => break,
            next = lines.next() => next,
        };
        let line = match next {
            None => break,
            Some(Ok(line)) => line,
            Some(Err(AnyDelimiterCodecError::Io(e))) => {
                log::warn!("{}: read failed: {e}", client.peer());
                break;
            }
            Some(Err(e)) => {
                log::warn!("{}: bad line: {e}", client.peer());
                break;
            }
        };

        // The bound rotator may have been removed since connect.
        let Some(rotator) = hub.rotator(client.rotator_name()) else {
            log::warn!("{}: rotator {} is gone", client.peer(), client.rotator_name());
            break;
        };

        let line = String::from_utf8_lossy(&line);
        if let Err(e) = execute(&client, rotator.as_ref(), &line).await {
            log::warn!("{}: {e}", client.peer());
            break;
        }
    }

    hub.remove_client(client.id());
    client.shutdown().await;
}

/// Apply one client line. An error ends the connection.
async fn execute(client: &TcpClient, rotator: &dyn Rotator, line: &str) -> Result<()> {
    let peer = client.peer();
    match ClientCommand::parse(line) {
        ClientCommand::Empty => {}
        ClientCommand::SetAzimuth(az) => {
            if let Err(e) = rotator.set_azimuth(az).await {
                log::warn!("{peer}: unable to set azimuth to {az}: {e}");
            }
        }
        ClientCommand::SetElevation(el) => {
            if let Err(e) = rotator.set_elevation(el).await {
                log::warn!("{peer}: unable to set elevation to {el}: {e}");
            }
        }
        ClientCommand::SetAzimuthElevation(az, el) => {
            if let Err(e) = rotator.set_azimuth(az).await {
                log::warn!("{peer}: unable to set azimuth to {az}: {e}");
            }
            if let Err(e) = rotator.set_elevation(el).await {
                log::warn!("{peer}: unable to set elevation to {el}: {e}");
            }
        }
        ClientCommand::QueryAzimuthElevation => {
            let h = rotator.heading();
            client
                .write_str(&format_position(h.azimuth, Some(h.elevation)))
                .await?;
        }
        ClientCommand::QueryAzimuth => {
            client.write_str(&format_position(rotator.azimuth(), None)).await?;
        }
        ClientCommand::StopAzimuth => rotator.stop_azimuth().await?,
        ClientCommand::StopElevation => rotator.stop_elevation().await?,
        ClientCommand::Stop => rotator.stop().await?,
        ClientCommand::Invalid(cmd) => {
            log::warn!("{peer}: invalid command {cmd:?}");
        }
        ClientCommand::Prompt | ClientCommand::Unknown => {
            client.write_str(PROMPT).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WsConfig;
    use crate::hal::{FailingWriter, MockRotator};
    use crate::messages::Heading;
    use crate::traits::EventSink;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    struct Session {
        hub: Arc<Hub>,
        rotator: Arc<MockRotator>,
        to_server: DuplexStream,
        from_server: BufReader<DuplexStream>,
    }

    async fn session() -> Session {
        session_with(256, Duration::from_secs(1)).await
    }

    async fn session_with(pipe: usize, write_wait: Duration) -> Session {
        let hub = Hub::new(EventSink::default(), WsConfig::default());
        let rotator = MockRotator::with_config(
            crate::config::RotatorConfig::builder("roof")
                .with_elevation(true)
                .build()
                .unwrap(),
        );
        hub.add_rotator(rotator.clone()).await.unwrap();

        let (to_server, server_in) = tokio::io::duplex(256);
        let (server_out, from_server) = tokio::io::duplex(pipe);
        tokio::spawn(handle_connection(
            Arc::clone(&hub),
            server_in,
            server_out,
            "test".into(),
            write_wait,
        ));
        wait_for_clients(&hub, 1).await;

        Session { hub, rotator, to_server, from_server: BufReader::new(from_server) }
    }

    async fn wait_for_clients(hub: &Hub, n: usize) {
        for _ in 0..100 {
            if hub.client_count(ClientKind::Tcp) == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} TCP clients");
    }

    async fn read_reply(s: &mut Session, n: usize) -> String {
        let mut buf = vec![0u8; n];
        tokio::io::AsyncReadExt::read_exact(&mut s.from_server, &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    #[tokio::test]
    async fn test_query_both_axes() {
        let mut s = session().await;
        s.rotator.set_position(30, 150);
        s.to_server.write_all(b"C2\r\n").await.unwrap();
        assert_eq!(read_reply(&mut s, 12).await, "+0030+0150\r\n");
    }

    #[tokio::test]
    async fn test_query_azimuth_lowercase() {
        let mut s = session().await;
        s.rotator.set_position(7, 0);
        s.to_server.write_all(b"c\n").await.unwrap();
        assert_eq!(read_reply(&mut s, 7).await, "+0007\r\n");
    }

    #[tokio::test]
    async fn test_set_commands_reach_rotator() {
        let mut s = session().await;
        s.to_server.write_all(b"M120\r\nN045\r\nW200 030\r\nS\r\nC2\r\n").await.unwrap();
        read_reply(&mut s, 12).await;

        assert_eq!(
            s.rotator.calls(),
            vec![
                "set_azimuth(120)",
                "set_elevation(45)",
                "set_azimuth(200)",
                "set_elevation(30)",
                "stop",
            ]
        );
    }

    #[tokio::test]
    async fn test_prompts() {
        let mut s = session().await;
        s.to_server.write_all(b"X\r\nM\r\n").await.unwrap();
        assert_eq!(read_reply(&mut s, 4).await, "?>?>");
    }

    #[tokio::test]
    async fn test_bad_number_ignored() {
        let mut s = session().await;
        s.to_server.write_all(b"Mabc\r\nW1 2\r\nC\r\n").await.unwrap();
        assert_eq!(read_reply(&mut s, 7).await, "+0000\r\n");
        assert!(s.rotator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stop_error_disconnects() {
        let mut s = session().await;
        s.rotator.set_failing(true);
        s.to_server.write_all(b"S\r\n").await.unwrap();

        let mut line = String::new();
        let n = s.from_server.read_line(&mut line).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(s.hub.client_count(ClientKind::Tcp), 0);
    }

    // ========================================================================
    // Events
    // ========================================================================

    #[tokio::test]
    async fn test_heading_pushed_for_bound_rotator_only() {
        let mut s = session().await;
        s.to_server.write_all(b"C\r\n").await.unwrap();
        read_reply(&mut s, 7).await;

        let heading = Heading { azimuth: 90, elevation: 10, ..Default::default() };
        s.hub.broadcast(Event::heading("other", heading));
        s.hub.broadcast(Event::add("other"));
        s.hub.broadcast(Event::heading("roof", heading));

        assert_eq!(read_reply(&mut s, 12).await, "+0090+0010\r\n");
    }

    #[tokio::test]
    async fn test_stalled_client_disconnected() {
        // room for exactly one position line, never drained
        let s = session_with(12, Duration::from_millis(100)).await;
        let Session { hub, rotator, mut to_server, from_server: _unread } = s;

        let heading = Heading { azimuth: 90, elevation: 10, ..Default::default() };
        hub.broadcast(Event::heading("roof", heading));
        hub.broadcast(Event::heading("roof", heading));
        wait_for_clients(&hub, 0).await;

        // commands are no longer read either
        let _ = to_server.write_all(b"M100\r\n").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rotator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_endless_line_disconnects() {
        let mut s = session().await;
        let _ = s.to_server.write_all(&[b'M'; MAX_LINE_LEN + 10]).await;

        let mut line = String::new();
        let n = s.from_server.read_line(&mut line).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(s.hub.client_count(ClientKind::Tcp), 0);
        assert!(s.rotator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_rotator_closes_connection() {
        let hub = Hub::new(EventSink::default(), WsConfig::default());
        let (_to_server, server_in) = tokio::io::duplex(64);
        let (server_out, mut from_server) = tokio::io::duplex(64);

        handle_connection(hub, server_in, server_out, "test".into(), Duration::from_secs(1)).await;

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut from_server, &mut buf)
            .await
            .unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_failing_client_send() {
        let client = TcpClient::new(1, "dead", "roof", FailingWriter, Duration::from_secs(1));
        let err = client
            .send(&Event::heading("roof", Heading::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
