//! Error types for rotator-hub.
//!
//! Every fallible operation in the library returns [`Result<T>`]. Background
//! tasks never return these to a caller; they hand the one fatal error of a
//! driver to its owner through the receiver returned by the constructor.

use std::time::Duration;

/// The error type for all rotator-hub operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A rotator or server configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A rotator with this name is already registered with the hub.
    #[error("rotator {0} already exists")]
    DuplicateRotator(String),

    /// No rotator with this name is registered.
    #[error("unable to find rotator {0}")]
    UnknownRotator(String),

    /// The rotator was configured without the requested axis.
    #[error("rotator does not support {0}")]
    Unsupported(&'static str),

    /// Opening or dialing the device failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The device sent something that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device stopped answering polls.
    #[error("no data received from rotator for {0:?}")]
    WatchdogExpired(Duration),

    /// The device or peer closed the connection.
    #[error("connection lost")]
    ConnectionLost,

    /// A command was issued after the driver shut down.
    #[error("rotator closed")]
    Closed,

    /// A request to a remote hub failed.
    #[error("remote hub error: {0}")]
    Remote(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_duplicate() {
        let e = Error::DuplicateRotator("tower".into());
        assert_eq!(e.to_string(), "rotator tower already exists");
    }

    #[test]
    fn test_display_unsupported() {
        let e = Error::Unsupported("elevation");
        assert_eq!(e.to_string(), "rotator does not support elevation");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
