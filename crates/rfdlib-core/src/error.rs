//! Error types for rfdlib transports.
//!
//! All fallible link-level operations return [`Result<T>`], which uses
//! [`Error`] as the error type. Protocol and session failures are layered on
//! top of this in `rfdlib-at`.

/// The error type for link-level operations.
///
/// Variants cover the failure modes of talking to a modem over a byte
/// stream: device failures, timeouts, and a link that has gone away.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open, configuration, USB).
    #[error("transport error: {0}")]
    Transport(String),

    /// Timed out waiting for the modem.
    ///
    /// For reads this typically means the modem is silent: wrong baud rate,
    /// powered off, or simply not answering the last command.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to a transport operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The transport has not been opened, or was closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

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
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_display_connection_lost() {
        assert_eq!(Error::ConnectionLost.to_string(), "connection lost");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
