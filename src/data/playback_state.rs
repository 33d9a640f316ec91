/// Playback state reported by the server
use serde::{Serialize, Deserialize};
use strum_macros::EnumString;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum PlaybackState {
    /// Nothing is playing
    #[serde(rename = "stopped")]
    #[strum(serialize = "stopped", serialize = "stop")]
    Stopped,
    /// A track is playing
    #[serde(rename = "playing")]
    #[strum(serialize = "playing", serialize = "play")]
    Playing,
    /// Playback is paused
    #[serde(rename = "paused")]
    #[strum(serialize = "paused", serialize = "pause")]
    Paused,
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Stopped
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}
