use crate::data::{PlaybackMode, PlaybackState, Track};
use serde::{Serialize, Deserialize};
use std::fmt;

/// A discrete change observed by the state monitor
///
/// Events own all of their data so they can cross threads freely. Within one
/// poll cycle they are delivered in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChangeEvent {
    /// First successful poll after the monitor started
    Initialized,

    /// A database update finished, `changed` tells whether the database changed
    DatabaseUpdated { changed: bool },

    /// The server queue was modified (the local queue cache has been resynced)
    PlaylistChanged,

    StateChanged(PlaybackState),

    ModeChanged(PlaybackMode),

    /// The current track changed, `None` when nothing is selected any more
    SongChanged(Option<Track>),

    /// Elapsed time in whole seconds
    ElapsedChanged(u64),

    /// Mixer volume in percent
    VolumeChanged(u8),
}

impl ChangeEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Initialized => "initialized",
            ChangeEvent::DatabaseUpdated { .. } => "database_updated",
            ChangeEvent::PlaylistChanged => "playlist_changed",
            ChangeEvent::StateChanged(_) => "state_changed",
            ChangeEvent::ModeChanged(_) => "mode_changed",
            ChangeEvent::SongChanged(_) => "song_changed",
            ChangeEvent::ElapsedChanged(_) => "elapsed_changed",
            ChangeEvent::VolumeChanged(_) => "volume_changed",
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::Initialized => write!(f, "initialized"),
            ChangeEvent::DatabaseUpdated { changed } => write!(f, "database updated (changed: {})", changed),
            ChangeEvent::PlaylistChanged => write!(f, "playlist changed"),
            ChangeEvent::StateChanged(state) => write!(f, "state changed: {}", state),
            ChangeEvent::ModeChanged(mode) => write!(f, "mode changed: {}", mode),
            ChangeEvent::SongChanged(Some(track)) => write!(f, "song changed: {}", track),
            ChangeEvent::SongChanged(None) => write!(f, "song cleared"),
            ChangeEvent::ElapsedChanged(secs) => write!(f, "elapsed: {}s", secs),
            ChangeEvent::VolumeChanged(volume) => write!(f, "volume: {}%", volume),
        }
    }
}
