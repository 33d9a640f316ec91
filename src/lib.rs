/// Value types shared by all layers
pub mod data;

/// Error types for transport, commands and the session
pub mod error;

/// Request/response access to an MPD server
pub mod transport;

/// Connection handles, queue cache, monitor and the session facade
pub mod session;

/// Session configuration
pub mod config;

/// Logger setup
pub mod logging;

pub use data::{ChangeEvent, PlaybackMode, PlaybackState, StatusSnapshot, Track, TrackId};
pub use error::{CommandError, ConnectionError, SessionError, TransportError};
pub use session::{Session, SessionListener, WaitStrategy};
pub use transport::ConnectionParams;
