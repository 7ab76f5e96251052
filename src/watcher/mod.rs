//! Tiered change detection over session files.
//!
//! A small set of recently active sessions gets real-time, debounced
//! filesystem events (hot tier); everything else is covered by cheap
//! periodic directory listings (cold tier), and files idle past a long
//! threshold stop being polled at all (frozen). [`WatchRegistry`] is the
//! pure state machine, [`TieredWatcher`] drives it with I/O for one
//! source, and [`WatcherManager`] merges watchers for several sources into
//! one event stream.

mod error;
mod events;
mod manager;
mod registry;
mod tiered;

pub use error::WatcherError;
pub use events::{ChangeEvent, ChangeKind};
pub use manager::WatcherManager;
pub use registry::{ListingOutcome, ObserveOutcome, Tier, WatchRegistry};
pub use tiered::{SessionIdFn, TieredWatcher};
