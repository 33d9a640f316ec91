use crate::data::{ChangeEvent, PlaybackMode, PlaybackState, StatusSnapshot, Track, TrackId};
use crate::error::{CommandError, SessionError};
use crate::session::connection::Connection;
use crate::session::queue::{resync_shared, SharedQueue};
use crate::transport::{ConnectionParams, Connector};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, trace, warn};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default pause between two poll cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

// Back-off after a transient idle failure so a flapping server does not spin the loop
const IDLE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// How long a disconnect waits for the monitor thread before detaching it
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// How the monitor waits between two poll cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Sleep for the interval; `stop()` interrupts the sleep immediately
    Poll(Duration),
    /// Block in the server's idle command until something changes. Shutdown
    /// needs a wake-up command sent on another connection.
    Idle,
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Poll(DEFAULT_POLL_INTERVAL)
    }
}

/// Lifecycle of the monitor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// What the monitor thread posts to the session
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorMessage {
    Event(ChangeEvent),
    /// The polling connection died, the monitor has stopped
    ConnectionLost(String),
}

/// Everything observed in one poll cycle
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub status: StatusSnapshot,
    /// Metadata of the current track, only fetched when the current id changed
    pub song: Option<Track>,
    /// Database stamp, `None` if it could not be read this cycle
    pub db_stamp: Option<String>,
}

/// Last delivered value of every observed field
///
/// `diff` turns a new sample into the events a consumer has not seen yet, in
/// delivery order. It has no I/O so it can be driven directly.
#[derive(Debug, Default)]
pub struct Observer {
    initialized: bool,
    state: Option<PlaybackState>,
    mode: Option<PlaybackMode>,
    song_id: Option<Option<TrackId>>,
    elapsed: Option<u64>,
    volume: Option<u8>,
    queue_version: Option<u32>,
    db_stamp: Option<String>,
    db_updating: bool,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the current track differs from the last delivered one
    pub fn song_changed(&self, status: &StatusSnapshot) -> bool {
        self.song_id != Some(status.current.map(|p| p.id))
    }

    /// Whether the server queue changed since the last delivered version
    ///
    /// Always false before the first cycle; the first cycle resyncs
    /// unconditionally.
    pub fn queue_changed(&self, status: &StatusSnapshot) -> bool {
        matches!(self.queue_version, Some(version) if version != status.queue_version)
    }

    pub fn diff(&mut self, sample: &Sample) -> Vec<ChangeEvent> {
        let status = &sample.status;
        let mut events = Vec::new();
        let first = !self.initialized;

        if first {
            events.push(ChangeEvent::Initialized);
            self.initialized = true;
        }

        self.diff_database(status, sample.db_stamp.as_ref(), first, &mut events);

        if !first && self.queue_changed(status) {
            events.push(ChangeEvent::PlaylistChanged);
        }
        self.queue_version = Some(status.queue_version);

        if self.state != Some(status.state) {
            self.state = Some(status.state);
            events.push(ChangeEvent::StateChanged(status.state));
        }

        if self.mode != Some(status.mode) {
            self.mode = Some(status.mode);
            events.push(ChangeEvent::ModeChanged(status.mode));
        }

        if self.song_changed(status) {
            let current = status.current.map(|p| p.id);
            self.song_id = Some(current);
            let song = match current {
                Some(_) => sample.song.clone(),
                None => None,
            };
            events.push(ChangeEvent::SongChanged(song));
        }

        let elapsed = status.elapsed_seconds();
        if self.elapsed != Some(elapsed) {
            self.elapsed = Some(elapsed);
            events.push(ChangeEvent::ElapsedChanged(elapsed));
        }

        // A missing mixer is not reported, so the last delivered volume stays
        if let Some(volume) = status.volume {
            if self.volume != Some(volume) {
                self.volume = Some(volume);
                events.push(ChangeEvent::VolumeChanged(volume));
            }
        }

        events
    }

    // Emits once an update job finishes, or when the stamp moved without a job
    // being seen
    fn diff_database(&mut self, status: &StatusSnapshot, stamp: Option<&String>, first: bool, events: &mut Vec<ChangeEvent>) {
        let updating = status.updating_db.is_some();

        if first {
            self.db_updating = updating;
            self.db_stamp = stamp.cloned();
            return;
        }

        if updating {
            self.db_updating = true;
            return;
        }

        let Some(stamp) = stamp else {
            return;
        };

        let stamp_changed = self.db_stamp.as_ref().map(|s| s != stamp).unwrap_or(false);
        if self.db_updating {
            events.push(ChangeEvent::DatabaseUpdated { changed: stamp_changed });
        } else if stamp_changed {
            events.push(ChangeEvent::DatabaseUpdated { changed: true });
        }
        self.db_updating = false;
        self.db_stamp = Some(stamp.clone());
    }
}

/// Handle to the background thread that watches the server
pub struct Monitor {
    state: Arc<Mutex<MonitorState>>,
    shutdown_tx: Sender<()>,
    // Disconnected once the thread has left `Worker::run`
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    strategy: WaitStrategy,
}

impl Monitor {
    /// Spawn the monitor thread
    ///
    /// The monitor opens its own connection with `connector`, it never shares
    /// the caller's command connection.
    pub fn start(
        connector: Arc<dyn Connector>,
        params: &ConnectionParams,
        queue: SharedQueue,
        strategy: WaitStrategy,
        events: Sender<MonitorMessage>,
    ) -> Result<Self, SessionError> {
        let state = Arc::new(Mutex::new(MonitorState::Idle));
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);
        let (done_tx, done_rx) = channel::bounded(0);

        let worker = Worker {
            connector,
            params: params.clone(),
            queue,
            strategy,
            events,
            shutdown_rx,
            state: state.clone(),
            _done: done_tx,
        };

        let handle = thread::Builder::new()
            .name("mpd-monitor".to_string())
            .spawn(move || worker.run())
            .map_err(|e| SessionError::Thread(e.to_string()))?;

        Ok(Self {
            state,
            shutdown_tx,
            done_rx,
            handle: Some(handle),
            strategy,
        })
    }

    pub fn state(&self) -> MonitorState {
        *lock_state(&self.state)
    }

    pub fn strategy(&self) -> WaitStrategy {
        self.strategy
    }

    /// Whether a blocked poll has to be woken by a server side change
    pub fn needs_wakeup(&self) -> bool {
        self.strategy == WaitStrategy::Idle
    }

    /// Ask the loop to exit at the next cycle boundary
    pub fn stop(&self) {
        {
            let mut state = lock_state(&self.state);
            match *state {
                MonitorState::Idle => *state = MonitorState::Stopped,
                MonitorState::Running => *state = MonitorState::Stopping,
                MonitorState::Stopping | MonitorState::Stopped => return,
            }
        }
        debug!("Monitor stop requested");
        // Interrupts a timed wait; a full channel already carries the request
        let _ = self.shutdown_tx.try_send(());
    }

    /// Block until the thread has exited
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Monitor thread panicked");
            }
            *lock_state(&self.state) = MonitorState::Stopped;
            debug!("Monitor thread joined");
        }
    }

    /// Join the thread if it exits within `timeout`, otherwise detach it
    ///
    /// Returns false when the thread was detached. A detached thread still
    /// exits on its own once its blocking call returns.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        if self.handle.is_none() {
            return true;
        }
        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("Monitor thread did not exit within {:?}, detaching it", timeout);
                self.handle.take();
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.wait();
                true
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
            self.wait_timeout(SHUTDOWN_GRACE);
        }
    }
}

fn lock_state(state: &Mutex<MonitorState>) -> std::sync::MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State moved into the monitor thread
struct Worker {
    connector: Arc<dyn Connector>,
    params: ConnectionParams,
    queue: SharedQueue,
    strategy: WaitStrategy,
    events: Sender<MonitorMessage>,
    shutdown_rx: Receiver<()>,
    state: Arc<Mutex<MonitorState>>,
    _done: Sender<()>,
}

impl Worker {
    fn run(self) {
        {
            let mut state = lock_state(&self.state);
            if *state != MonitorState::Idle {
                debug!("Monitor stopped before it started");
                *state = MonitorState::Stopped;
                return;
            }
            *state = MonitorState::Running;
        }
        info!("Monitor thread started for {}", self.params);

        match Connection::open(self.connector.clone(), &self.params) {
            Ok(mut conn) => {
                self.run_loop(&mut conn);
                conn.close();
            }
            Err(e) => {
                error!("Monitor could not open its connection: {}", e);
                let _ = self.events.send(MonitorMessage::ConnectionLost(e.to_string()));
            }
        }

        *lock_state(&self.state) = MonitorState::Stopped;
        info!("Monitor thread stopped");
    }

    fn stopping(&self) -> bool {
        *lock_state(&self.state) != MonitorState::Running
    }

    fn run_loop(&self, conn: &mut Connection) {
        let mut observer = Observer::new();

        while !self.stopping() {
            match poll_cycle(conn, &mut observer, &self.queue) {
                Ok(events) => {
                    for event in events {
                        trace!("Monitor delivering {}", event.kind());
                        if self.events.send(MonitorMessage::Event(event)).is_err() {
                            debug!("Event receiver gone, monitor exiting");
                            return;
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    warn!("Monitor connection lost: {}", e);
                    let _ = self.events.send(MonitorMessage::ConnectionLost(e.to_string()));
                    return;
                }
                Err(e) => {
                    warn!("Monitor poll failed, retrying next cycle: {}", e);
                    conn.clear_error();
                }
            }

            if self.stopping() || !self.wait_for_change(conn) {
                return;
            }
        }
    }

    /// Wait until the next cycle is due; false means the loop must exit
    fn wait_for_change(&self, conn: &mut Connection) -> bool {
        match self.strategy {
            WaitStrategy::Poll(interval) => match self.shutdown_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => true,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
            },
            WaitStrategy::Idle => match conn.execute(|t| t.idle()) {
                Ok(subsystems) => {
                    debug!("Idle returned: {:?}", subsystems);
                    true
                }
                Err(e) if e.is_fatal() => {
                    warn!("Monitor connection lost while idle: {}", e);
                    let _ = self.events.send(MonitorMessage::ConnectionLost(e.to_string()));
                    false
                }
                Err(e) => {
                    warn!("Idle failed, falling back to a short wait: {}", e);
                    conn.clear_error();
                    matches!(self.shutdown_rx.recv_timeout(IDLE_RETRY_DELAY), Err(RecvTimeoutError::Timeout))
                }
            },
        }
    }
}

/// One observe/diff cycle on the monitor's connection
///
/// On error nothing is recorded in `observer`, so the next successful cycle
/// reports every change that happened in between.
pub fn poll_cycle(conn: &mut Connection, observer: &mut Observer, queue: &SharedQueue) -> Result<Vec<ChangeEvent>, CommandError> {
    let status = conn.execute(|t| t.status())?;

    let db_stamp = match conn.execute(|t| t.database_stamp()) {
        Ok(stamp) => Some(stamp),
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            debug!("Could not read database stamp: {}", e);
            conn.clear_error();
            None
        }
    };

    let song = if status.current.is_some() && observer.song_changed(&status) {
        conn.execute(|t| t.current_song())?
    } else {
        None
    };

    if !observer.is_initialized() {
        let tracks = resync_shared(queue, conn)?;
        debug!("Monitor resynced {} tracks on its first cycle", tracks.len());
    } else if observer.queue_changed(&status) {
        let tracks = resync_shared(queue, conn)?;
        debug!("External queue change detected, resynced {} tracks", tracks.len());
    }

    Ok(observer.diff(&Sample { status, song, db_stamp }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::QueuePlace;

    fn status(volume: u8) -> StatusSnapshot {
        StatusSnapshot {
            state: PlaybackState::Playing,
            mode: PlaybackMode::Normal,
            volume: Some(volume),
            elapsed: Duration::from_secs(30),
            current: Some(QueuePlace::new(TrackId(1), 0)),
            queue_version: 5,
            queue_len: 2,
            updating_db: None,
        }
    }

    fn sample(status: StatusSnapshot) -> Sample {
        Sample {
            status,
            song: None,
            db_stamp: Some("stamp-1".to_string()),
        }
    }

    fn primed(status: StatusSnapshot) -> Observer {
        let mut observer = Observer::new();
        observer.diff(&sample(status));
        observer
    }

    #[test]
    fn test_first_cycle_reports_initialized_then_current_values() {
        let mut observer = Observer::new();
        let events = observer.diff(&sample(status(40)));
        assert_eq!(events[0], ChangeEvent::Initialized);
        assert!(events.contains(&ChangeEvent::StateChanged(PlaybackState::Playing)));
        assert!(events.contains(&ChangeEvent::VolumeChanged(40)));
        assert!(!events.contains(&ChangeEvent::PlaylistChanged));
    }

    #[test]
    fn test_volume_only_change_yields_single_event() {
        let mut observer = primed(status(40));
        let events = observer.diff(&sample(status(55)));
        assert_eq!(events, vec![ChangeEvent::VolumeChanged(55)]);
    }

    #[test]
    fn test_unchanged_sample_yields_nothing() {
        let mut observer = primed(status(40));
        assert!(observer.diff(&sample(status(40))).is_empty());
    }

    #[test]
    fn test_song_change_is_reported_before_elapsed_and_volume() {
        let mut observer = primed(status(40));

        let mut next = status(60);
        next.current = Some(QueuePlace::new(TrackId(2), 1));
        next.elapsed = Duration::ZERO;
        let mut track_b = Track::with_uri("b.mp3");
        track_b.place = next.current;

        let events = observer.diff(&Sample {
            status: next,
            song: Some(track_b.clone()),
            db_stamp: Some("stamp-1".to_string()),
        });
        assert_eq!(
            events,
            vec![
                ChangeEvent::SongChanged(Some(track_b)),
                ChangeEvent::ElapsedChanged(0),
                ChangeEvent::VolumeChanged(60),
            ]
        );
    }

    #[test]
    fn test_queue_version_bump_reports_playlist_change() {
        let mut observer = primed(status(40));
        let mut next = status(40);
        next.queue_version = 6;
        assert!(observer.queue_changed(&next));
        assert_eq!(observer.diff(&sample(next)), vec![ChangeEvent::PlaylistChanged]);
    }

    #[test]
    fn test_database_update_reported_when_job_finishes() {
        let mut observer = primed(status(40));

        let mut updating = status(40);
        updating.updating_db = Some(3);
        assert!(observer.diff(&sample(updating)).is_empty());

        let events = observer.diff(&Sample {
            status: status(40),
            song: None,
            db_stamp: Some("stamp-2".to_string()),
        });
        assert_eq!(events, vec![ChangeEvent::DatabaseUpdated { changed: true }]);
    }

    #[test]
    fn test_database_update_without_changes() {
        let mut observer = primed(status(40));
        let mut updating = status(40);
        updating.updating_db = Some(4);
        observer.diff(&sample(updating));

        let events = observer.diff(&sample(status(40)));
        assert_eq!(events, vec![ChangeEvent::DatabaseUpdated { changed: false }]);
    }

    #[test]
    fn test_mode_and_state_changes() {
        let mut observer = primed(status(40));
        let mut next = status(40);
        next.state = PlaybackState::Paused;
        next.mode = PlaybackMode::RandomRepeat;
        assert_eq!(
            observer.diff(&sample(next)),
            vec![
                ChangeEvent::StateChanged(PlaybackState::Paused),
                ChangeEvent::ModeChanged(PlaybackMode::RandomRepeat),
            ]
        );
    }

    #[test]
    fn test_volume_reported_once_across_missing_mixer() {
        let mut observer = primed(status(40));

        let mut no_mixer = status(40);
        no_mixer.volume = None;
        assert!(observer.diff(&sample(no_mixer)).is_empty());
        assert!(observer.diff(&sample(status(40))).is_empty());

        assert_eq!(observer.diff(&sample(status(45))), vec![ChangeEvent::VolumeChanged(45)]);
    }

    #[test]
    fn test_song_cleared_when_queue_emptied() {
        let mut observer = primed(status(40));
        let mut next = status(40);
        next.current = None;
        next.state = PlaybackState::Stopped;
        next.elapsed = Duration::from_secs(30);
        let events = observer.diff(&sample(next));
        assert!(events.contains(&ChangeEvent::SongChanged(None)));
    }
}
