use crate::config::SessionConfig;
use crate::data::{ChangeEvent, PlaybackMode, StatusSnapshot, Track, TrackId};
use crate::error::{CommandError, SessionError, TransportError};
use crate::session::connection::Connection;
use crate::session::monitor::{Monitor, MonitorMessage, MonitorState, WaitStrategy, SHUTDOWN_GRACE};
use crate::session::queue::{read_queue, QueueCache, SharedQueue};
use crate::session::reconciler::{Added, Reconciler};
use crate::transport::{ConnectionParams, Connector, MpdConnector, Transport};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use log::{debug, info, trace, warn};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};

/// Receives change notifications from a [`Session`]
pub trait SessionListener: Send + Sync {
    /// Called for every change in the order the monitor observed them
    fn on_event(&self, event: &ChangeEvent);

    /// Called once after the monitor lost its connection and the session
    /// disconnected itself
    fn on_connection_lost(&self) {}
}

/// Everything that only exists while connected
struct Connected {
    conn: Connection,
    monitor: Monitor,
    events: Receiver<MonitorMessage>,
}

/// Client side session with one MPD server
///
/// Commands run on a dedicated connection guarded by a mutex, a background
/// monitor watches the server on its own connection and reports changes.
/// Mutating calls are best effort: failures are logged and reported as
/// `false`/`None`, never as errors.
pub struct Session {
    connector: Arc<dyn Connector>,
    wait_strategy: WaitStrategy,
    inner: Mutex<Option<Connected>>,
    params: Mutex<Option<ConnectionParams>>,
    queue: SharedQueue,
    last_added: Mutex<Option<Added>>,
    listeners: RwLock<Vec<Weak<dyn SessionListener>>>,
}

impl Session {
    /// Session talking to a real MPD server, polling for changes
    pub fn new() -> Self {
        Self::with_connector(Arc::new(MpdConnector::new()), WaitStrategy::default())
    }

    /// Session using the wait strategy from `config`
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::with_connector(Arc::new(MpdConnector::new()), config.wait_strategy())
    }

    pub fn with_connector(connector: Arc<dyn Connector>, wait_strategy: WaitStrategy) -> Self {
        debug!("Creating new Session with {:?}", wait_strategy);
        Self {
            connector,
            wait_strategy,
            inner: Mutex::new(None),
            params: Mutex::new(None),
            queue: QueueCache::shared(),
            last_added: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Connect to `host:port`, false if already connected or the server is unreachable
    pub fn connect(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match self.connect_with(&ConnectionParams::new(host, port, timeout)) {
            Ok(()) => true,
            Err(SessionError::AlreadyConnected) => {
                debug!("Already connected, ignoring connect to {}:{}", host, port);
                false
            }
            Err(e) => {
                warn!("Could not connect to {}:{}: {}", host, port, e);
                false
            }
        }
    }

    /// Open the command connection, start the monitor and sync the queue
    ///
    /// Nothing is started unless the command connection could be opened.
    pub fn connect_with(&self, params: &ConnectionParams) -> Result<(), SessionError> {
        let mut inner = self.lock_inner();
        if inner.is_some() {
            return Err(SessionError::AlreadyConnected);
        }

        let mut conn = Connection::open(self.connector.clone(), params)?;

        let (sender, events) = channel::unbounded();
        let monitor = Monitor::start(self.connector.clone(), params, self.queue.clone(), self.wait_strategy, sender)?;

        match Reconciler::new(&mut conn, &self.queue).resync() {
            Ok(tracks) => debug!("Initial queue sync: {} tracks", tracks.len()),
            Err(e) => warn!("Initial queue sync failed: {}", e),
        }

        *inner = Some(Connected { conn, monitor, events });
        *lock(&self.params) = Some(params.clone());
        info!("Connected to MPD at {}", params);
        Ok(())
    }

    /// Stop the monitor and close the command connection
    ///
    /// Safe to call when not connected. A monitor thread that has not exited
    /// within [`SHUTDOWN_GRACE`] is detached.
    pub fn disconnect(&self) {
        let connected = self.lock_inner().take();
        let Some(Connected { mut conn, mut monitor, events }) = connected else {
            trace!("Disconnect ignored, not connected");
            return;
        };

        monitor.stop();
        // Dropping the receiver makes any further send fail, so the monitor exits
        drop(events);

        let mut grace = SHUTDOWN_GRACE;
        if monitor.needs_wakeup() && monitor.state() != MonitorState::Stopped && !wake_monitor(&mut conn) {
            warn!("Could not wake the monitor, leaving it to exit on its own");
            grace = Duration::ZERO;
        }
        monitor.wait_timeout(grace);

        conn.close();
        info!("Disconnected from MPD");
    }

    pub fn is_connected(&self) -> bool {
        self.lock_inner().is_some()
    }

    /// Parameters of the last successful connect
    pub fn params(&self) -> Option<ConnectionParams> {
        lock(&self.params).clone()
    }

    pub fn monitor_state(&self) -> Option<MonitorState> {
        self.lock_inner().as_ref().map(|c| c.monitor.state())
    }

    /// Start playback, at the given queue entry if any
    pub fn play(&self, id: Option<TrackId>) -> bool {
        match id {
            Some(id) => self.command("play id", move |t| t.play_id(id)),
            None => self.command("play", |t| t.play()),
        }
    }

    pub fn play_position(&self, pos: u32) -> bool {
        self.command("play position", move |t| t.play_pos(pos))
    }

    pub fn pause(&self) -> bool {
        self.command("pause", |t| t.pause(true))
    }

    pub fn stop(&self) -> bool {
        self.command("stop", |t| t.stop())
    }

    pub fn next(&self) -> bool {
        self.command("next", |t| t.next())
    }

    pub fn previous(&self) -> bool {
        self.command("previous", |t| t.previous())
    }

    pub fn set_repeat(&self, on: bool) -> bool {
        self.command("repeat", move |t| t.set_repeat(on))
    }

    pub fn set_random(&self, on: bool) -> bool {
        self.command("random", move |t| t.set_random(on))
    }

    /// Set both mode flags; true only if both commands went through
    pub fn set_mode(&self, mode: PlaybackMode) -> bool {
        self.with_connection("set mode", |conn| {
            conn.execute(|t| t.set_repeat(mode.repeat()))?;
            conn.execute(|t| t.set_random(mode.random()))
        })
        .is_some()
    }

    /// Set the mixer volume, clamped to 0..=100
    pub fn set_volume(&self, volume: u8) -> bool {
        let volume = volume.min(100);
        self.command("volume", move |t| t.set_volume(volume))
    }

    /// Start a database update, returns the job id
    pub fn update_database(&self, path: Option<&str>) -> Option<u32> {
        let job = self.with_connection("update", |conn| conn.execute(|t| t.update(path)))?;
        info!("Database update started, job {}", job);
        Some(job)
    }

    /// Fresh status read from the server
    pub fn status(&self) -> Option<StatusSnapshot> {
        self.with_connection("status", |conn| conn.execute(|t| t.status()))
    }

    pub fn current_song(&self) -> Option<Track> {
        self.with_connection("current song", |conn| conn.execute(|t| t.current_song()))
            .flatten()
    }

    /// Every song in the server's library
    pub fn library_songs(&self) -> Vec<Track> {
        self.with_connection("list library", |conn| conn.execute(|t| t.list_all()))
            .unwrap_or_default()
    }

    /// Rebuild the queue cache from the server and return it
    ///
    /// Falls back to the cached queue when the server cannot be read.
    pub fn sync_queue(&self) -> Vec<Track> {
        let mut inner = self.lock_inner();
        if let Some(connected) = inner.as_mut() {
            match Reconciler::new(&mut connected.conn, &self.queue).resync() {
                Ok(tracks) => return tracks,
                Err(e) => warn!("Queue sync failed, returning cached queue: {}", e),
            }
        }
        drop(inner);
        self.queue()
    }

    /// Cached queue, no server round trip
    pub fn queue(&self) -> Vec<Track> {
        read_queue(&self.queue).tracks().to_vec()
    }

    /// Add `uri` at `position`, or append it if not already queued
    ///
    /// The outcome is also remembered for [`Session::last_added_id`].
    pub fn append_or_insert(&self, uri: &str, position: Option<u32>) -> Option<Added> {
        let mut inner = self.lock_inner();
        let added = match inner.as_mut() {
            Some(connected) => Reconciler::new(&mut connected.conn, &self.queue).append_or_insert(uri, position),
            None => {
                debug!("Cannot add {}, not connected", uri);
                None
            }
        };
        *lock(&self.last_added) = added;
        added
    }

    pub fn last_added_id(&self) -> Option<TrackId> {
        lock(&self.last_added).map(|a| a.id)
    }

    pub fn last_added_position(&self) -> Option<u32> {
        lock(&self.last_added).map(|a| a.position)
    }

    pub fn shuffle_queue(&self) -> bool {
        self.with_reconciler("shuffle", |r| r.shuffle())
    }

    pub fn clear_queue(&self) -> bool {
        self.with_reconciler("clear", |r| r.clear())
    }

    /// Register a listener, false if it is already registered
    pub fn register_listener(&self, listener: Weak<dyn SessionListener>) -> bool {
        let mut listeners = match self.listeners.write() {
            Ok(listeners) => listeners,
            Err(_) => {
                warn!("Failed to acquire write lock when registering listener");
                return false;
            }
        };

        if let Some(new) = listener.upgrade() {
            if listeners.iter().filter_map(Weak::upgrade).any(|old| Arc::ptr_eq(&new, &old)) {
                debug!("Listener already registered, skipping");
                return false;
            }
        }
        listeners.push(listener);
        debug!("Listener registered, total listeners: {}", listeners.len());
        true
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn SessionListener>) -> bool {
        let Ok(mut listeners) = self.listeners.write() else {
            warn!("Failed to acquire write lock when unregistering listener");
            return false;
        };
        let original_len = listeners.len();
        listeners.retain(|weak| weak.upgrade().map(|l| !Arc::ptr_eq(&l, listener)).unwrap_or(false));
        listeners.len() < original_len
    }

    /// Forward every pending event to the listeners, returns how many were delivered
    pub fn dispatch_events(&self) -> usize {
        let Some(events) = self.event_receiver() else {
            return 0;
        };

        let mut delivered = 0;
        loop {
            match events.try_recv() {
                Ok(MonitorMessage::Event(event)) => {
                    self.notify(&event);
                    delivered += 1;
                }
                Ok(MonitorMessage::ConnectionLost(reason)) => {
                    self.connection_lost(&reason);
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        delivered
    }

    /// Wait up to `timeout` for the next event
    ///
    /// Listeners are not called for events taken this way.
    pub fn next_event(&self, timeout: Duration) -> Option<ChangeEvent> {
        let events = self.event_receiver()?;
        let deadline = Instant::now() + timeout;

        match events.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(MonitorMessage::Event(event)) => Some(event),
            Ok(MonitorMessage::ConnectionLost(reason)) => {
                self.connection_lost(&reason);
                None
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn event_receiver(&self) -> Option<Receiver<MonitorMessage>> {
        self.lock_inner().as_ref().map(|c| c.events.clone())
    }

    fn connection_lost(&self, reason: &str) {
        warn!("Lost connection to MPD: {}", reason);
        self.disconnect();
        for listener in self.live_listeners() {
            listener.on_connection_lost();
        }
    }

    fn notify(&self, event: &ChangeEvent) {
        let listeners = self.live_listeners();
        trace!("Notifying {} listeners of {}", listeners.len(), event.kind());
        for listener in listeners {
            listener.on_event(event);
        }
    }

    // Upgraded snapshot, so no lock is held while listeners run
    fn live_listeners(&self) -> Vec<Arc<dyn SessionListener>> {
        match self.listeners.write() {
            Ok(mut listeners) => {
                listeners.retain(|weak| weak.strong_count() > 0);
                listeners.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => {
                warn!("Failed to acquire listener lock when notifying");
                Vec::new()
            }
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Option<Connected>> {
        lock(&self.inner)
    }

    /// Run `f` on the command connection; failures are logged and cleared
    fn with_connection<T, F>(&self, what: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut Connection) -> Result<T, CommandError>,
    {
        let mut inner = self.lock_inner();
        let Some(connected) = inner.as_mut() else {
            debug!("{} ignored, not connected", what);
            return None;
        };

        match f(&mut connected.conn) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{} failed: {}", what, e);
                connected.conn.clear_error();
                None
            }
        }
    }

    fn command<F>(&self, what: &str, command: F) -> bool
    where
        F: FnOnce(&mut dyn Transport) -> Result<(), TransportError>,
    {
        debug!("Sending {} command", what);
        self.with_connection(what, |conn| conn.execute(command)).is_some()
    }

    fn with_reconciler<F>(&self, what: &str, f: F) -> bool
    where
        F: FnOnce(&mut Reconciler<'_>) -> bool,
    {
        let mut inner = self.lock_inner();
        match inner.as_mut() {
            Some(connected) => f(&mut Reconciler::new(&mut connected.conn, &self.queue)),
            None => {
                debug!("Queue {} ignored, not connected", what);
                false
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Session lock was poisoned, continuing with last state");
        poisoned.into_inner()
    })
}

/// Cause an idle event on the server so a monitor blocked in idle returns
///
/// Re-asserts the current volume. Without a mixer the repeat flag is flipped
/// and restored, since setting it to its current value is not a change.
fn wake_monitor(conn: &mut Connection) -> bool {
    conn.clear_error();
    let status = match conn.execute(|t| t.status()) {
        Ok(status) => status,
        Err(e) => {
            debug!("Wake-up status read failed: {}", e);
            return false;
        }
    };

    let result = match status.volume {
        Some(volume) => conn.execute(|t| t.set_volume(volume)),
        None => {
            let repeat = status.mode.repeat();
            conn.execute(|t| t.set_repeat(!repeat)).and_then(|()| conn.execute(|t| t.set_repeat(repeat)))
        }
    };

    match result {
        Ok(()) => {
            debug!("Sent wake-up command to the monitor");
            true
        }
        Err(e) => {
            debug!("Wake-up command failed: {}", e);
            false
        }
    }
}
