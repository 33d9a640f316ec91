use serde::{Serialize, Deserialize};
use std::fmt;
use std::time::Duration;

/// Server-assigned identifier of a queue entry
///
/// Ids are stable across reordering of the queue, positions are not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location of an entry inside the server queue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuePlace {
    /// Stable queue id
    pub id: TrackId,
    /// Zero-based position, shifts whenever the queue is reordered
    pub pos: u32,
}

impl QueuePlace {
    pub fn new(id: TrackId, pos: u32) -> Self {
        Self { id, pos }
    }
}

/// A track as reported by the server
///
/// Tracks fetched from the queue carry a `QueuePlace`, tracks coming from a
/// library listing do not.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Track {
    /// File path or stream URL, used as the identity for duplicate suppression
    pub uri: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub place: Option<QueuePlace>,
}

impl Track {
    /// Create a track that only knows its URI
    pub fn with_uri(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            ..Default::default()
        }
    }

    /// Queue id, if this track is a queue entry
    pub fn id(&self) -> Option<TrackId> {
        self.place.map(|p| p.id)
    }

    /// Queue position, if this track is a queue entry
    pub fn position(&self) -> Option<u32> {
        self.place.map(|p| p.pos)
    }

    /// Best human readable name: the title if tagged, otherwise the URI
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.uri)
    }

    /// Two tracks are the same queue entry iff their ids match
    pub fn same_entry(&self, other: &Track) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri && self.place == other.place
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.artist, self.id()) {
            (Some(artist), Some(id)) => write!(f, "[{}] {} - {}", id, artist, self.display_name()),
            (None, Some(id)) => write!(f, "[{}] {}", id, self.display_name()),
            (Some(artist), None) => write!(f, "{} - {}", artist, self.display_name()),
            (None, None) => write!(f, "{}", self.display_name()),
        }
    }
}
