use crate::data::{Track, TrackId};
use crate::error::{CommandError, TransportError};
use crate::session::connection::Connection;
use crate::session::queue::{read_queue, resync_shared, write_queue, QueueCache};
use crate::transport::Transport;
use log::{debug, info, warn};
use std::sync::RwLock;

/// Result of a successful add: the new (or already present) queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Added {
    pub id: TrackId,
    pub position: u32,
}

/// Queue mutations that keep the queue cache in line with the server
///
/// The cache is only patched after the server confirmed a command. Whenever an
/// incremental patch is not possible the cache is rebuilt from the server.
pub struct Reconciler<'a> {
    conn: &'a mut Connection,
    queue: &'a RwLock<QueueCache>,
}

impl<'a> Reconciler<'a> {
    pub fn new(conn: &'a mut Connection, queue: &'a RwLock<QueueCache>) -> Self {
        Self { conn, queue }
    }

    /// Add `uri` to the queue, at `position` or at the end
    ///
    /// With an explicit position there is no fallback: a failure is reported
    /// as `None` and the cache stays untouched. Appending is idempotent per
    /// URI and falls back to a plain add when the id returning command fails.
    pub fn append_or_insert(&mut self, uri: &str, position: Option<u32>) -> Option<Added> {
        match position {
            Some(pos) => self.insert_at(uri, pos),
            None => self.append(uri),
        }
    }

    fn insert_at(&mut self, uri: &str, pos: u32) -> Option<Added> {
        debug!("Inserting {} at position {}", uri, pos);

        let id = match self.conn.execute(|t| t.add_id_to(uri, pos)) {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to insert {} at position {}: {}", uri, pos, e);
                self.conn.clear_error();
                return None;
            }
        };

        match self.fetch_entry(id) {
            Some(track) => {
                let mut queue = write_queue(self.queue);
                // The monitor may have resynced since the add
                if queue.find_by_id(id).is_none() {
                    queue.insert_at(pos as usize, track);
                }
            }
            None => self.resync_after_stale(id),
        }

        Some(Added { id, position: pos })
    }

    fn append(&mut self, uri: &str) -> Option<Added> {
        if let Some(existing) = self.find_cached(uri) {
            debug!("{} already queued as {}, not adding again", uri, existing.id);
            return Some(existing);
        }

        match self.conn.execute(|t| t.add_id(uri)) {
            Ok(id) => {
                let added = match self.fetch_entry(id) {
                    Some(track) => {
                        let mut queue = write_queue(self.queue);
                        let position = track.position().unwrap_or(queue.len() as u32);
                        if queue.find_by_id(id).is_none() {
                            queue.append(track);
                        }
                        Added { id, position }
                    }
                    None => {
                        self.resync_after_stale(id);
                        let position = read_queue(self.queue)
                            .find_by_id(id)
                            .and_then(|t| t.position())
                            .unwrap_or(0);
                        Added { id, position }
                    }
                };
                debug!("Appended {} as {} at position {}", uri, added.id, added.position);
                Some(added)
            }
            Err(e) => {
                debug!("Adding {} with id failed ({}), retrying with plain add", uri, e);
                self.conn.clear_error();
                self.append_without_id(uri)
            }
        }
    }

    // The plain add gives neither id nor position, so the cache is rebuilt
    fn append_without_id(&mut self, uri: &str) -> Option<Added> {
        if let Err(e) = self.conn.execute(|t| t.add(uri)) {
            warn!("Failed to add {} to the queue: {}", uri, e);
            self.conn.clear_error();
            return None;
        }

        if let Err(e) = resync_shared(self.queue, self.conn) {
            warn!("Added {} but could not resync the queue: {}", uri, e);
            self.conn.clear_error();
            return None;
        }

        let queue = read_queue(self.queue);
        let added = queue
            .tracks()
            .iter()
            .rev()
            .find(|t| t.uri == uri)
            .and_then(|t| t.place)
            .map(|place| Added { id: place.id, position: place.pos });
        if added.is_none() {
            warn!("Added {} but it does not show up in the queue", uri);
        }
        added
    }

    /// Shuffle the server queue and rebuild the cache
    ///
    /// Returns false if the server refused, in which case nothing changes.
    pub fn shuffle(&mut self) -> bool {
        self.run_and_resync("shuffle", |t| t.shuffle())
    }

    /// Clear the server queue and rebuild the cache
    pub fn clear(&mut self) -> bool {
        self.run_and_resync("clear", |t| t.clear())
    }

    /// Rebuild the cache from the server
    pub fn resync(&mut self) -> Result<Vec<Track>, CommandError> {
        resync_shared(self.queue, self.conn).map_err(|e| {
            self.conn.clear_error();
            e
        })
    }

    fn run_and_resync<F>(&mut self, name: &str, command: F) -> bool
    where
        F: FnOnce(&mut dyn Transport) -> Result<(), TransportError>,
    {
        if let Err(e) = self.conn.execute(command) {
            warn!("Queue {} failed: {}", name, e);
            self.conn.clear_error();
            return false;
        }

        match self.resync() {
            Ok(tracks) => {
                info!("Queue {} done, {} tracks", name, tracks.len());
                true
            }
            Err(e) => {
                warn!("Queue {} done but resync failed: {}", name, e);
                true
            }
        }
    }

    fn find_cached(&self, uri: &str) -> Option<Added> {
        let queue = read_queue(self.queue);
        let index = queue.contains(uri)?;
        let place = queue.get(index)?.place?;
        Some(Added { id: place.id, position: place.pos })
    }

    /// Full metadata of a freshly added entry
    fn fetch_entry(&mut self, id: TrackId) -> Option<Track> {
        match self.conn.execute(|t| t.queue_song(id)) {
            Ok(Some(track)) => Some(track),
            Ok(None) => {
                debug!("Queue entry {} vanished right after it was added", id);
                None
            }
            Err(e) => {
                debug!("Could not fetch queue entry {}: {}", id, e);
                self.conn.clear_error();
                None
            }
        }
    }

    // The add went through but the cache cannot be patched, rebuild instead
    fn resync_after_stale(&mut self, id: TrackId) {
        debug!("Queue cache stale after adding {}, resyncing", id);
        if let Err(e) = self.resync() {
            warn!("Resync after adding {} failed: {}", id, e);
        }
    }
}
