//! Opening the byte stream to a GS232 controller.
//!
//! A controller hangs off a serial port or, through a serial-to-network
//! bridge, a TCP socket. Either way the driver only sees a boxed read half
//! and a boxed write half, so tests can hand it an in-memory pipe instead.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::{Endpoint, Gs232Settings};
use crate::error::{Error, Result};

/// Read half of a device connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a device connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Open the endpoint named in `settings`.
pub async fn open(settings: &Gs232Settings) -> Result<(BoxedReader, BoxedWriter)> {
    match &settings.endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| Error::Transport(format!("unable to connect to {addr}: {e}")))?;
            stream.set_nodelay(true)?;
            log::debug!("connected to {addr}");
            let (r, w) = stream.into_split();
            Ok((Box::new(r), Box::new(w)))
        }
        Endpoint::Serial(path) => open_serial(path, settings.baud_rate),
    }
}

#[cfg(feature = "serial")]
fn open_serial(path: &str, baud_rate: u32) -> Result<(BoxedReader, BoxedWriter)> {
    use tokio_serial::SerialPortBuilderExt;

    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| Error::Transport(format!("unable to open {path}: {e}")))?;

    log::debug!("opened {path} at {baud_rate} baud");
    let (r, w) = tokio::io::split(port);
    Ok((Box::new(r), Box::new(w)))
}

#[cfg(not(feature = "serial"))]
fn open_serial(path: &str, _baud_rate: u32) -> Result<(BoxedReader, BoxedWriter)> {
    Err(Error::Transport(format!(
        "unable to open {path}: built without serial support"
    )))
}
