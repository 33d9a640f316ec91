use std::io;
use thiserror::Error;

/// Failure of a single call on the underlying transport
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Socket level failure, the connection is gone
    #[error("I/O error: {0}")]
    Io(String),

    /// The server did not answer in time; the handle reconnects before the
    /// next command
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The server rejected the command (ACK)
    #[error("Server error: {0}")]
    Server(String),

    /// The response could not be parsed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport has already been closed
    #[error("Connection closed")]
    Closed,
}

impl TransportError {
    /// Whether this error means the connection itself is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Io(_) | TransportError::Closed)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout(err.to_string()),
            _ => TransportError::Io(err.to_string()),
        }
    }
}

impl From<mpd::error::Error> for TransportError {
    fn from(err: mpd::error::Error) -> Self {
        match err {
            mpd::error::Error::Io(e) => TransportError::from(e),
            mpd::error::Error::Server(e) => TransportError::Server(e.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// The session could not be established
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: TransportError,
    },
}

/// A single command failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("Command failed: {0}")]
    Failed(#[from] TransportError),

    /// A previous failure on this handle has not been cleared yet
    #[error("Unacknowledged error on connection: {0}")]
    Unacknowledged(String),

    #[error("Connection is closed")]
    Closed,
}

impl CommandError {
    /// Whether the failure means the connection is dead
    pub fn is_fatal(&self) -> bool {
        match self {
            CommandError::Failed(e) => e.is_fatal(),
            CommandError::Closed => true,
            _ => false,
        }
    }
}

/// Errors surfaced by the session facade
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is already connected")]
    AlreadyConnected,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start monitor thread: {0}")]
    Thread(String),
}
