use crate::data::{PlaybackMode, PlaybackState, QueuePlace, StatusSnapshot, Track, TrackId};
use crate::error::TransportError;
use crate::transport::{ConnectionParams, Connector, Subsystem, Transport};
use log::{debug, trace};
use mpd::idle::Subsystem as MpdSubsystem;
use mpd::{Client, Id, Idle, Query, Term};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Opens `MpdTransport`s over TCP
#[derive(Debug, Clone, Default)]
pub struct MpdConnector;

impl MpdConnector {
    pub fn new() -> Self {
        MpdConnector
    }

    fn connect_stream(params: &ConnectionParams) -> Result<TcpStream, TransportError> {
        let address = params.address();
        let addrs: Vec<_> = address
            .to_socket_addrs()
            .map_err(|e| TransportError::Io(format!("cannot resolve {}: {}", address, e)))?
            .collect();

        let mut last_error = TransportError::Io(format!("no addresses for {}", address));
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, params.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(params.read_timeout)?;
                    stream.set_write_timeout(Some(params.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connecting to {} failed: {}", addr, e);
                    last_error = TransportError::from(e);
                }
            }
        }
        Err(last_error)
    }
}

impl Connector for MpdConnector {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn Transport>, TransportError> {
        debug!("Opening MPD connection to {}", params);
        let stream = Self::connect_stream(params)?;
        let control = stream.try_clone()?;
        let client = Client::new(stream)?;
        debug!(
            "Connected to MPD {}.{}.{} at {}",
            client.version.0, client.version.1, client.version.2, params
        );
        Ok(Box::new(MpdTransport {
            client: Some(client),
            control: Some(control),
            read_timeout: params.read_timeout,
        }))
    }
}

/// `Transport` backed by an `mpd::Client`
///
/// Every command runs under the connection's read timeout except `idle`,
/// which may legitimately wait forever.
pub struct MpdTransport {
    client: Option<Client<TcpStream>>,
    // Second handle on the client's socket, used to change its timeouts
    control: Option<TcpStream>,
    read_timeout: Option<Duration>,
}

impl MpdTransport {
    fn client(&mut self) -> Result<&mut Client<TcpStream>, TransportError> {
        self.client.as_mut().ok_or(TransportError::Closed)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        match &self.control {
            Some(stream) => Ok(stream.set_read_timeout(timeout)?),
            None => Err(TransportError::Closed),
        }
    }

    fn wait_idle(&mut self) -> Result<Vec<Subsystem>, TransportError> {
        let client = self.client()?;
        let guard = client.idle(&[
            MpdSubsystem::Player,
            MpdSubsystem::Mixer,
            MpdSubsystem::Options,
            MpdSubsystem::Playlist,
            MpdSubsystem::Database,
            MpdSubsystem::Update,
        ])?;
        let events = guard.get()?;
        Ok(events.into_iter().map(Self::convert_subsystem).collect())
    }

    /// Request object understood by the add commands
    fn song_path(uri: &str) -> mpd::Song {
        mpd::Song {
            file: uri.to_string(),
            ..Default::default()
        }
    }

    /// Convert an MPD song to our Track format
    fn convert_song(song: mpd::Song) -> Track {
        let album = song.tags.iter()
            .find(|(tag, _)| tag == "Album")
            .map(|(_, value)| value.clone());

        Track {
            title: song.title,
            artist: song.artist,
            album,
            duration: song.duration,
            place: song.place.map(|p| QueuePlace::new(TrackId(p.id.0), p.pos)),
            uri: song.file,
        }
    }

    fn convert_status(status: mpd::Status) -> StatusSnapshot {
        let state = match status.state {
            mpd::State::Play => PlaybackState::Playing,
            mpd::State::Pause => PlaybackState::Paused,
            mpd::State::Stop => PlaybackState::Stopped,
        };

        // MPD returns -1 for no volume control
        let volume = if status.volume >= 0 {
            Some(status.volume.min(100) as u8)
        } else {
            None
        };

        StatusSnapshot {
            state,
            mode: PlaybackMode::from_flags(status.repeat, status.random),
            volume,
            elapsed: status.elapsed.unwrap_or(Duration::ZERO),
            current: status.song.map(|p| QueuePlace::new(TrackId(p.id.0), p.pos)),
            queue_version: status.queue_version,
            queue_len: status.queue_len,
            updating_db: status.updating_db,
        }
    }

    fn convert_subsystem(subsystem: MpdSubsystem) -> Subsystem {
        match subsystem {
            MpdSubsystem::Database => Subsystem::Database,
            MpdSubsystem::Update => Subsystem::Update,
            MpdSubsystem::Playlist => Subsystem::Queue,
            MpdSubsystem::Player => Subsystem::Player,
            MpdSubsystem::Mixer => Subsystem::Mixer,
            MpdSubsystem::Options => Subsystem::Options,
            _ => Subsystem::Other,
        }
    }
}

impl Transport for MpdTransport {
    fn status(&mut self) -> Result<StatusSnapshot, TransportError> {
        let status = self.client()?.status()?;
        trace!("MPD status: {:?}", status);
        Ok(Self::convert_status(status))
    }

    fn current_song(&mut self) -> Result<Option<Track>, TransportError> {
        Ok(self.client()?.currentsong()?.map(Self::convert_song))
    }

    fn database_stamp(&mut self) -> Result<String, TransportError> {
        let stats = self.client()?.stats()?;
        // Only used for equality checks against the previous stamp
        Ok(format!("{:?}", stats.db_update))
    }

    fn update(&mut self, path: Option<&str>) -> Result<u32, TransportError> {
        if let Some(path) = path {
            debug!("Path scoped update requested for '{}', updating the whole database", path);
        }
        Ok(self.client()?.update()?)
    }

    fn list_all(&mut self) -> Result<Vec<Track>, TransportError> {
        let songs = self.client()?.listall()?;
        debug!("Retrieved {} songs from MPD library", songs.len());
        Ok(songs.into_iter().map(Self::convert_song).collect())
    }

    fn queue(&mut self) -> Result<Vec<Track>, TransportError> {
        let songs = self.client()?.queue()?;
        debug!("Retrieved {} songs from MPD queue", songs.len());
        Ok(songs.into_iter().map(Self::convert_song).collect())
    }

    fn add_id_to(&mut self, uri: &str, pos: u32) -> Result<TrackId, TransportError> {
        let song = Self::song_path(uri);
        let id = self.client()?.insert(&song, pos as usize)?;
        Ok(TrackId(id as u32))
    }

    fn add_id(&mut self, uri: &str) -> Result<TrackId, TransportError> {
        let song = Self::song_path(uri);
        let id = self.client()?.push(&song)?;
        Ok(TrackId(id.0))
    }

    /// Plain add through `findadd` on the `file` tag
    ///
    /// `mpd::Client` has no id-less `add`, so this only matches songs in the
    /// database. Stream URLs and other uris outside the library are refused
    /// by the server even though a real `add` would accept them.
    fn add(&mut self, uri: &str) -> Result<(), TransportError> {
        let mut query = Query::new();
        query.and(Term::File, uri);
        Ok(self.client()?.findadd(&query)?)
    }

    fn queue_song(&mut self, id: TrackId) -> Result<Option<Track>, TransportError> {
        Ok(self.client()?.playlistid(Id(id.0))?.map(Self::convert_song))
    }

    fn shuffle(&mut self) -> Result<(), TransportError> {
        Ok(self.client()?.shuffle(..)?)
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        Ok(self.client()?.clear()?)
    }

    fn play(&mut self) -> Result<(), TransportError> {
        Ok(self.client()?.play()?)
    }

    fn play_id(&mut self, id: TrackId) -> Result<(), TransportError> {
        Ok(self.client()?.switch(Id(id.0))?)
    }

    fn play_pos(&mut self, pos: u32) -> Result<(), TransportError> {
        Ok(self.client()?.switch(pos)?)
    }

    fn pause(&mut self, pause: bool) -> Result<(), TransportError> {
        Ok(self.client()?.pause(pause)?)
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        Ok(self.client()?.stop()?)
    }

    fn next(&mut self) -> Result<(), TransportError> {
        Ok(self.client()?.next()?)
    }

    fn previous(&mut self) -> Result<(), TransportError> {
        Ok(self.client()?.prev()?)
    }

    fn set_repeat(&mut self, on: bool) -> Result<(), TransportError> {
        Ok(self.client()?.repeat(on)?)
    }

    fn set_random(&mut self, on: bool) -> Result<(), TransportError> {
        Ok(self.client()?.random(on)?)
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), TransportError> {
        Ok(self.client()?.volume(volume.min(100) as i8)?)
    }

    fn idle(&mut self) -> Result<Vec<Subsystem>, TransportError> {
        self.set_read_timeout(None)?;
        let result = self.wait_idle();
        self.set_read_timeout(self.read_timeout)?;
        result
    }

    fn ping(&mut self) -> Result<(), TransportError> {
        Ok(self.client()?.ping()?)
    }

    fn close(&mut self) {
        self.control.take();
        if self.client.take().is_some() {
            debug!("Closed MPD connection");
        }
    }
}
