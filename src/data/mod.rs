// Value types shared by the session, the monitor and the transport

pub mod change_event;
pub mod playback_mode;
pub mod playback_state;
pub mod status;
pub mod track;

// Re-export types from child modules
pub use change_event::*;
pub use playback_mode::*;
pub use playback_state::*;
pub use status::*;
pub use track::*;
