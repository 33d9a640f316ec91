use crate::data::{Track, TrackId};
use crate::error::CommandError;
use crate::session::connection::Connection;
use log::{debug, warn};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Queue cache shared between the caller and the monitor thread
pub type SharedQueue = Arc<RwLock<QueueCache>>;

/// Read access that survives a panicked writer
pub fn read_queue(queue: &RwLock<QueueCache>) -> RwLockReadGuard<'_, QueueCache> {
    queue.read().unwrap_or_else(|poisoned| {
        warn!("Queue cache lock was poisoned, continuing with last state");
        poisoned.into_inner()
    })
}

/// Write access, see [`read_queue`]
pub fn write_queue(queue: &RwLock<QueueCache>) -> RwLockWriteGuard<'_, QueueCache> {
    queue.write().unwrap_or_else(|poisoned| {
        warn!("Queue cache lock was poisoned, continuing with last state");
        poisoned.into_inner()
    })
}

/// Fetch the server queue and swap it into the shared cache
///
/// The write lock is held across the fetch, so a resync can never replace the
/// cache with a copy older than the one it finds. The fetch runs under the
/// connection's read timeout, which bounds how long readers can be held up.
pub fn resync_shared(queue: &RwLock<QueueCache>, conn: &mut Connection) -> Result<Vec<Track>, CommandError> {
    let mut cache = write_queue(queue);
    cache.resync(conn)
}

/// Local mirror of the server queue, in playback order
///
/// The cache is rebuilt wholesale by [`QueueCache::resync`] or patched
/// incrementally once a server command has been confirmed.
#[derive(Debug, Clone, Default)]
pub struct QueueCache {
    tracks: Vec<Track>,
}

impl QueueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache that can be shared between threads
    pub fn shared() -> SharedQueue {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Fetch the full queue from the server without touching any cache
    pub fn fetch(conn: &mut Connection) -> Result<Vec<Track>, CommandError> {
        conn.execute(|t| t.queue())
    }

    /// Replace the cached queue with a fresh copy from the server
    ///
    /// On failure the cache is left unchanged and the error is returned; the
    /// pending error on the connection is left for the caller to clear.
    pub fn resync(&mut self, conn: &mut Connection) -> Result<Vec<Track>, CommandError> {
        let tracks = Self::fetch(conn)?;
        self.replace(tracks.clone());
        Ok(tracks)
    }

    /// Swap in a freshly fetched queue
    pub fn replace(&mut self, tracks: Vec<Track>) {
        debug!("Queue cache replaced: {} -> {} tracks", self.tracks.len(), tracks.len());
        self.tracks = tracks;
    }

    /// Insert at `pos`, clamped to the end of the queue
    pub fn insert_at(&mut self, pos: usize, track: Track) {
        let pos = if pos > self.tracks.len() {
            warn!("Insert position {} beyond queue length {}, appending", pos, self.tracks.len());
            self.tracks.len()
        } else {
            pos
        };
        self.tracks.insert(pos, track);
        self.renumber_from(pos);
    }

    pub fn append(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Position of the first entry with the given URI
    pub fn contains(&self, uri: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.uri == uri)
    }

    pub fn find_by_id(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == Some(id))
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    // Positions after an insertion shift by one on the server as well
    fn renumber_from(&mut self, start: usize) {
        for (index, track) in self.tracks.iter_mut().enumerate().skip(start) {
            if let Some(place) = track.place.as_mut() {
                place.pos = index as u32;
            }
        }
    }
}
