/// Repeat and random flags collapsed into a single mode
use serde::{Serialize, Deserialize};
use strum_macros::EnumString;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum PlaybackMode {
    /// Neither repeat nor random
    #[serde(rename = "normal")]
    #[strum(serialize = "normal")]
    Normal,
    /// Repeat the queue
    #[serde(rename = "repeat")]
    #[strum(serialize = "repeat")]
    Repeat,
    /// Play the queue in random order
    #[serde(rename = "random")]
    #[strum(serialize = "random")]
    Random,
    /// Random order, repeating forever
    #[serde(rename = "random-repeat")]
    #[strum(serialize = "random-repeat", serialize = "randomrepeat")]
    RandomRepeat,
}

impl PlaybackMode {
    /// Build the mode from the server's repeat and random flags
    pub fn from_flags(repeat: bool, random: bool) -> Self {
        match (repeat, random) {
            (false, false) => PlaybackMode::Normal,
            (true, false) => PlaybackMode::Repeat,
            (false, true) => PlaybackMode::Random,
            (true, true) => PlaybackMode::RandomRepeat,
        }
    }

    pub fn repeat(&self) -> bool {
        matches!(self, PlaybackMode::Repeat | PlaybackMode::RandomRepeat)
    }

    pub fn random(&self) -> bool {
        matches!(self, PlaybackMode::Random | PlaybackMode::RandomRepeat)
    }
}

impl Default for PlaybackMode {
    fn default() -> Self {
        PlaybackMode::Normal
    }
}

impl std::fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackMode::Normal => write!(f, "normal"),
            PlaybackMode::Repeat => write!(f, "repeat"),
            PlaybackMode::Random => write!(f, "random"),
            PlaybackMode::RandomRepeat => write!(f, "random-repeat"),
        }
    }
}
