// Common helpers for integration tests: an in-memory MPD server
#![allow(dead_code)]

use mpdsession::data::{PlaybackMode, PlaybackState, QueuePlace, StatusSnapshot, Track, TrackId};
use mpdsession::error::TransportError;
use mpdsession::session::Session;
use mpdsession::transport::{ConnectionParams, Connector, Subsystem, Transport};
use mpdsession::{ChangeEvent, WaitStrategy};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const POLL: Duration = Duration::from_millis(20);

/// Everything the fake server knows
#[derive(Debug, Default)]
pub struct ServerState {
    pub library: Vec<String>,
    pub queue: Vec<Track>,
    pub next_id: u32,
    pub state: PlaybackState,
    pub repeat: bool,
    pub random: bool,
    /// `None` means no mixer
    pub volume: Option<u8>,
    pub elapsed: Duration,
    pub current: Option<TrackId>,
    pub queue_version: u32,
    pub updating_db: Option<u32>,
    pub next_job: u32,
    pub db_stamp: u32,
    /// Command name -> number of upcoming calls that fail with an ACK
    pub failures: HashMap<String, usize>,
    /// Command name -> number of upcoming calls that time out
    pub timeouts: HashMap<String, usize>,
    /// Every call that reached the server, by command name
    pub commands: Vec<String>,
    pub connections_opened: usize,
    /// All connections are reset and new ones refused
    pub down: bool,
    /// Idle calls stay blocked even when something changed
    pub idle_deaf: bool,
    generation: u64,
}

impl ServerState {
    fn touch(&mut self) {
        self.generation += 1;
    }

    fn queue_touched(&mut self) {
        for (pos, track) in self.queue.iter_mut().enumerate() {
            if let Some(place) = track.place.as_mut() {
                place.pos = pos as u32;
            }
        }
        self.queue_version += 1;
        self.touch();
    }

    fn new_entry(&mut self, uri: &str) -> Result<Track, TransportError> {
        if !self.library.iter().any(|u| u == uri) {
            return Err(TransportError::Server(format!("ACK [50@0] {{add}} No such song: {}", uri)));
        }
        self.next_id += 1;
        let mut track = Track::with_uri(uri);
        track.title = Some(uri.trim_end_matches(".mp3").to_uppercase());
        track.place = Some(QueuePlace::new(TrackId(self.next_id), self.queue.len() as u32));
        Ok(track)
    }

    fn position_of(&self, id: TrackId) -> Option<usize> {
        self.queue.iter().position(|t| t.id() == Some(id))
    }

    fn start_at(&mut self, index: usize) -> Result<(), TransportError> {
        let id = self
            .queue
            .get(index)
            .and_then(|t| t.id())
            .ok_or_else(|| TransportError::Server("ACK [2@0] {play} Bad song index".to_string()))?;
        self.current = Some(id);
        self.state = PlaybackState::Playing;
        self.elapsed = Duration::ZERO;
        self.touch();
        Ok(())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let current = self
            .current
            .and_then(|id| self.position_of(id).map(|pos| QueuePlace::new(id, pos as u32)));
        StatusSnapshot {
            state: self.state,
            mode: PlaybackMode::from_flags(self.repeat, self.random),
            volume: self.volume,
            elapsed: self.elapsed,
            current,
            queue_version: self.queue_version,
            queue_len: self.queue.len() as u32,
            updating_db: self.updating_db,
        }
    }

    pub fn queue_uris(&self) -> Vec<String> {
        self.queue.iter().map(|t| t.uri.clone()).collect()
    }
}

struct Shared {
    state: Mutex<ServerState>,
    changed: Condvar,
}

/// Handle for tests to script the fake server
#[derive(Clone)]
pub struct FakeServer {
    shared: Arc<Shared>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::with_library(&["a.mp3", "b.mp3", "c.mp3", "d.mp3"])
    }

    pub fn with_library(uris: &[&str]) -> Self {
        let state = ServerState {
            library: uris.iter().map(|u| u.to_string()).collect(),
            volume: Some(40),
            queue_version: 1,
            next_job: 1,
            ..Default::default()
        };
        FakeServer {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector { shared: self.shared.clone() })
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.shared.state.lock().unwrap()
    }

    /// Change server state as another client would
    pub fn external<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        let result = {
            let mut state = self.lock();
            let result = f(&mut state);
            state.touch();
            result
        };
        self.shared.changed.notify_all();
        result
    }

    /// Append tracks as another client would
    pub fn external_add(&self, uris: &[&str]) {
        self.external(|s| {
            for uri in uris {
                let track = s.new_entry(uri).unwrap();
                s.queue.push(track);
            }
            s.queue_touched();
        });
    }

    pub fn read<R>(&self, f: impl FnOnce(&ServerState) -> R) -> R {
        f(&self.lock())
    }

    pub fn fail_next(&self, command: &str, times: usize) {
        self.lock().failures.insert(command.to_string(), times);
    }

    pub fn time_out_next(&self, command: &str, times: usize) {
        self.lock().timeouts.insert(command.to_string(), times);
    }

    pub fn queue(&self) -> Vec<Track> {
        self.read(|s| s.queue.clone())
    }

    pub fn queue_uris(&self) -> Vec<String> {
        self.read(|s| s.queue_uris())
    }

    pub fn count(&self, command: &str) -> usize {
        self.read(|s| s.commands.iter().filter(|c| *c == command).count())
    }

    pub fn connections_opened(&self) -> usize {
        self.read(|s| s.connections_opened)
    }

    /// Finish the running update job
    pub fn finish_update(&self, changed: bool) {
        self.external(|s| {
            s.updating_db = None;
            if changed {
                s.db_stamp += 1;
            }
        });
    }

    /// Reset every connection, as if the server went away
    pub fn kill(&self) {
        self.lock().down = true;
        self.shared.changed.notify_all();
    }
}

struct FakeConnector {
    shared: Arc<Shared>,
}

impl Connector for FakeConnector {
    fn open(&self, _params: &ConnectionParams) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.down {
            return Err(TransportError::Io("connection refused".to_string()));
        }
        state.connections_opened += 1;
        Ok(Box::new(FakeTransport {
            shared: self.shared.clone(),
            seen_generation: state.generation,
            closed: false,
        }))
    }
}

struct FakeTransport {
    shared: Arc<Shared>,
    seen_generation: u64,
    closed: bool,
}

impl FakeTransport {
    fn call<T>(&mut self, name: &str, f: impl FnOnce(&mut ServerState) -> Result<T, TransportError>) -> Result<T, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let result = {
            let mut state = self.shared.state.lock().unwrap();
            if state.down {
                return Err(TransportError::Io("connection reset by peer".to_string()));
            }
            state.commands.push(name.to_string());
            if let Some(remaining) = state.timeouts.get_mut(name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Timeout(format!("{} timed out", name)));
                }
            }
            if let Some(remaining) = state.failures.get_mut(name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Server(format!("ACK [5@0] {{{}}} simulated failure", name)));
                }
            }
            f(&mut state)
        };
        self.shared.changed.notify_all();
        result
    }
}

impl Transport for FakeTransport {
    fn status(&mut self) -> Result<StatusSnapshot, TransportError> {
        self.call("status", |s| Ok(s.snapshot()))
    }

    fn current_song(&mut self) -> Result<Option<Track>, TransportError> {
        self.call("currentsong", |s| {
            Ok(s.current.and_then(|id| s.position_of(id)).map(|pos| s.queue[pos].clone()))
        })
    }

    fn database_stamp(&mut self) -> Result<String, TransportError> {
        self.call("stats", |s| Ok(s.db_stamp.to_string()))
    }

    fn update(&mut self, _path: Option<&str>) -> Result<u32, TransportError> {
        self.call("update", |s| {
            let job = s.next_job;
            s.next_job += 1;
            s.updating_db = Some(job);
            s.touch();
            Ok(job)
        })
    }

    fn list_all(&mut self) -> Result<Vec<Track>, TransportError> {
        self.call("listall", |s| Ok(s.library.iter().map(|u| Track::with_uri(u)).collect()))
    }

    fn queue(&mut self) -> Result<Vec<Track>, TransportError> {
        self.call("playlistinfo", |s| Ok(s.queue.clone()))
    }

    fn add_id_to(&mut self, uri: &str, pos: u32) -> Result<TrackId, TransportError> {
        self.call("addid", |s| {
            if pos as usize > s.queue.len() {
                return Err(TransportError::Server("ACK [2@0] {addid} Bad song index".to_string()));
            }
            let track = s.new_entry(uri)?;
            let id = TrackId(s.next_id);
            s.queue.insert(pos as usize, track);
            s.queue_touched();
            Ok(id)
        })
    }

    fn add_id(&mut self, uri: &str) -> Result<TrackId, TransportError> {
        self.call("addid", |s| {
            let track = s.new_entry(uri)?;
            let id = TrackId(s.next_id);
            s.queue.push(track);
            s.queue_touched();
            Ok(id)
        })
    }

    fn add(&mut self, uri: &str) -> Result<(), TransportError> {
        self.call("add", |s| {
            let track = s.new_entry(uri)?;
            s.queue.push(track);
            s.queue_touched();
            Ok(())
        })
    }

    fn queue_song(&mut self, id: TrackId) -> Result<Option<Track>, TransportError> {
        self.call("playlistid", |s| Ok(s.position_of(id).map(|pos| s.queue[pos].clone())))
    }

    fn shuffle(&mut self) -> Result<(), TransportError> {
        // Deterministic: reversing is a valid permutation
        self.call("shuffle", |s| {
            s.queue.reverse();
            s.queue_touched();
            Ok(())
        })
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.call("clear", |s| {
            s.queue.clear();
            s.current = None;
            s.state = PlaybackState::Stopped;
            s.queue_touched();
            Ok(())
        })
    }

    fn play(&mut self) -> Result<(), TransportError> {
        self.call("play", |s| {
            let index = s.current.and_then(|id| s.position_of(id)).unwrap_or(0);
            s.start_at(index)
        })
    }

    fn play_id(&mut self, id: TrackId) -> Result<(), TransportError> {
        self.call("playid", |s| {
            let index = s
                .position_of(id)
                .ok_or_else(|| TransportError::Server("ACK [50@0] {playid} No such song".to_string()))?;
            s.start_at(index)
        })
    }

    fn play_pos(&mut self, pos: u32) -> Result<(), TransportError> {
        self.call("play", |s| s.start_at(pos as usize))
    }

    fn pause(&mut self, pause: bool) -> Result<(), TransportError> {
        self.call("pause", |s| {
            if s.state != PlaybackState::Stopped {
                s.state = if pause { PlaybackState::Paused } else { PlaybackState::Playing };
                s.touch();
            }
            Ok(())
        })
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.call("stop", |s| {
            s.state = PlaybackState::Stopped;
            s.elapsed = Duration::ZERO;
            s.touch();
            Ok(())
        })
    }

    fn next(&mut self) -> Result<(), TransportError> {
        self.call("next", |s| {
            let index = s.current.and_then(|id| s.position_of(id)).map(|i| i + 1).unwrap_or(0);
            s.start_at(index)
        })
    }

    fn previous(&mut self) -> Result<(), TransportError> {
        self.call("previous", |s| {
            let index = s.current.and_then(|id| s.position_of(id)).unwrap_or(0);
            s.start_at(index.saturating_sub(1))
        })
    }

    fn set_repeat(&mut self, on: bool) -> Result<(), TransportError> {
        // MPD only reports an options change when the flag actually flips
        self.call("repeat", |s| {
            if s.repeat != on {
                s.repeat = on;
                s.touch();
            }
            Ok(())
        })
    }

    fn set_random(&mut self, on: bool) -> Result<(), TransportError> {
        self.call("random", |s| {
            if s.random != on {
                s.random = on;
                s.touch();
            }
            Ok(())
        })
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), TransportError> {
        self.call("setvol", |s| {
            if s.volume.is_none() {
                return Err(TransportError::Server("ACK [52@0] {setvol} problems setting volume".to_string()));
            }
            s.volume = Some(volume);
            s.touch();
            Ok(())
        })
    }

    /// Blocks until some client changed something since the last idle
    fn idle(&mut self) -> Result<Vec<Subsystem>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut state = self.shared.state.lock().unwrap();
        while (state.generation == self.seen_generation || state.idle_deaf) && !state.down {
            state = self.shared.changed.wait_timeout(state, Duration::from_millis(50)).unwrap().0;
        }
        if state.down {
            return Err(TransportError::Io("connection reset by peer".to_string()));
        }
        self.seen_generation = state.generation;
        Ok(vec![Subsystem::Player])
    }

    fn ping(&mut self) -> Result<(), TransportError> {
        self.call("ping", |_| Ok(()))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Connected session on a fresh fake server
pub fn connected_session(strategy: WaitStrategy) -> (FakeServer, Session) {
    let server = FakeServer::new();
    let session = Session::with_connector(server.connector(), strategy);
    assert!(session.connect("localhost", 6600, Duration::from_secs(1)));
    (server, session)
}

/// Pull events until one matches or `timeout` passes
pub fn wait_for_event<F>(session: &Session, timeout: Duration, mut matches: F) -> Option<ChangeEvent>
where
    F: FnMut(&ChangeEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(event) = session.next_event(Duration::from_millis(50)) {
            if matches(&event) {
                return Some(event);
            }
        }
    }
    None
}

/// Collect events until nothing arrives for `quiet`
pub fn drain_events(session: &Session, quiet: Duration) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Some(event) = session.next_event(quiet) {
        events.push(event);
    }
    events
}

/// Poll `condition` until it holds or `timeout` passes
pub fn eventually<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
