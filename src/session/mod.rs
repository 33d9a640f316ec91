//! Session layer: connection handles, queue cache, reconciler and monitor
//!
//! [`Session`] ties them together and is what applications use.

pub mod connection;
pub mod monitor;
pub mod queue;
pub mod reconciler;
#[allow(clippy::module_inception)]
mod session;

pub use self::connection::Connection;
pub use self::monitor::{MonitorMessage, MonitorState, Observer, WaitStrategy, DEFAULT_POLL_INTERVAL};
pub use self::queue::{QueueCache, SharedQueue};
pub use self::reconciler::{Added, Reconciler};
pub use self::session::{Session, SessionListener};
