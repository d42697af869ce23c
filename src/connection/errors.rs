use std::fmt;

use failure::{Backtrace, Fail};

/// Error state when a connection operation fails
#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
}

/// Represents the type of error that occurred
#[derive(Debug, Fail)]
pub enum ConnectionErrorKind {
    /// The application denied the session during connect
    #[fail(display = "The application rejected the connection: {}", reason)]
    ClientRejected { reason: String },

    /// An operation was attempted on a connection that has already been
    /// closed
    #[fail(display = "The connection is closed")]
    ConnectionClosed,
}

impl ConnectionError {
    pub fn client_rejected<S: Into<String>>(reason: S) -> ConnectionError {
        ConnectionError {
            kind: ConnectionErrorKind::ClientRejected {
                reason: reason.into(),
            },
        }
    }

    pub fn connection_closed() -> ConnectionError {
        ConnectionError {
            kind: ConnectionErrorKind::ConnectionClosed,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl Fail for ConnectionError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.kind.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.kind.backtrace()
    }
}
