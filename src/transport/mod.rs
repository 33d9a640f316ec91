//! Request/response primitives the session is built on
//!
//! Every call is blocking and may fail independently of the next one. The
//! production implementation talks to MPD through the `mpd` crate, tests plug
//! in their own `Connector`.

mod mpd_transport;
pub use self::mpd_transport::{MpdConnector, MpdTransport};

use crate::data::{StatusSnapshot, Track, TrackId};
use crate::error::TransportError;
use std::fmt;
use std::time::Duration;

/// Default MPD port
pub const DEFAULT_PORT: u16 = 6600;

/// Where and how to connect
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    /// Connect timeout, also used as read/write timeout when `read_timeout` is set
    pub timeout: Duration,
    /// Read timeout for responses, `None` blocks indefinitely. `idle` always
    /// waits without one.
    pub read_timeout: Option<Duration>,
}

impl ConnectionParams {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            read_timeout: Some(timeout),
        }
    }

    /// `host:port` string
    pub fn address(&self) -> String {
        let host = if self.host.is_empty() { "localhost" } else { &self.host };
        format!("{}:{}", host, self.port)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT, Duration::from_secs(5))
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Server subsystems reported by an idle call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Database,
    Update,
    Queue,
    Player,
    Mixer,
    Options,
    Other,
}

/// One request/response channel to the server
///
/// Implementations are not safe for concurrent use, callers serialize access.
pub trait Transport: Send {
    /// Current status
    fn status(&mut self) -> Result<StatusSnapshot, TransportError>;

    /// Currently selected track with full metadata
    fn current_song(&mut self) -> Result<Option<Track>, TransportError>;

    /// Opaque marker that changes whenever the database was modified
    fn database_stamp(&mut self) -> Result<String, TransportError>;

    /// Start a database update, returns the update job id
    fn update(&mut self, path: Option<&str>) -> Result<u32, TransportError>;

    /// Every song in the library
    fn list_all(&mut self) -> Result<Vec<Track>, TransportError>;

    /// The full queue in server order
    fn queue(&mut self) -> Result<Vec<Track>, TransportError>;

    /// Add a song at the given position and return its id
    fn add_id_to(&mut self, uri: &str, pos: u32) -> Result<TrackId, TransportError>;

    /// Append a song and return its id
    fn add_id(&mut self, uri: &str) -> Result<TrackId, TransportError>;

    /// Append a song without learning its id
    ///
    /// The MPD implementation can only add songs known to the database.
    fn add(&mut self, uri: &str) -> Result<(), TransportError>;

    /// Queue entry with the given id
    fn queue_song(&mut self, id: TrackId) -> Result<Option<Track>, TransportError>;

    fn shuffle(&mut self) -> Result<(), TransportError>;
    fn clear(&mut self) -> Result<(), TransportError>;
    fn play(&mut self) -> Result<(), TransportError>;
    fn play_id(&mut self, id: TrackId) -> Result<(), TransportError>;
    fn play_pos(&mut self, pos: u32) -> Result<(), TransportError>;
    fn pause(&mut self, pause: bool) -> Result<(), TransportError>;
    fn stop(&mut self) -> Result<(), TransportError>;
    fn next(&mut self) -> Result<(), TransportError>;
    fn previous(&mut self) -> Result<(), TransportError>;
    fn set_repeat(&mut self, on: bool) -> Result<(), TransportError>;
    fn set_random(&mut self, on: bool) -> Result<(), TransportError>;
    fn set_volume(&mut self, volume: u8) -> Result<(), TransportError>;

    /// Block until one of the watched subsystems changes, without a read
    /// timeout
    fn idle(&mut self) -> Result<Vec<Subsystem>, TransportError>;

    fn ping(&mut self) -> Result<(), TransportError>;

    /// Release the underlying socket, must be idempotent
    fn close(&mut self);
}

/// Opens transports, one per logical connection
pub trait Connector: Send + Sync {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn Transport>, TransportError>;
}
