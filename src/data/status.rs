use crate::data::{PlaybackMode, PlaybackState, QueuePlace};
use serde::{Serialize, Deserialize};
use std::time::Duration;

/// One status sample taken from the server
///
/// Snapshots are produced fresh on every poll and replaced, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StatusSnapshot {
    pub state: PlaybackState,

    pub mode: PlaybackMode,

    /// Mixer volume in percent, `None` when the server has no mixer
    pub volume: Option<u8>,

    /// Elapsed time of the current track
    pub elapsed: Duration,

    /// Currently selected queue entry
    pub current: Option<QueuePlace>,

    /// Queue version, bumped by the server on every queue modification
    pub queue_version: u32,

    pub queue_len: u32,

    /// Id of the running database update job
    pub updating_db: Option<u32>,
}

impl StatusSnapshot {
    /// Elapsed time truncated to whole seconds
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed.as_secs()
    }
}
