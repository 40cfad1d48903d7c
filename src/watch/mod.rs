//! Watchers: prefix-filtered subscriptions to the event buffer.
//!
//! - [`Watch`] describes what a subscriber wants (prefixes, queue depth).
//! - [`BufferWatcher`] is the live handle returned by
//!   [`CircularBuffer::new_watcher`](crate::CircularBuffer::new_watcher).
//! - The watcher tree indexes registrations by path segment so an emit only
//!   visits watchers whose prefixes lie on the event key's path.
//!
//! # Example
//!
//! ```ignore
//! let watcher = buffer.new_watcher(Watch::prefixes(["/users"]).with_queue_size(64))?;
//!
//! loop {
//!     match watcher.recv() {
//!         Ok(event) if event.kind == EventType::Init => println!("caught up"),
//!         Ok(event) => println!("{} {}", event.kind, event.item.key),
//!         Err(_) => break, // evicted or closed: resync and watch again
//!     }
//! }
//! ```

mod tree;
mod types;
mod watcher;

pub(crate) use tree::WatcherTree;
pub(crate) use watcher::{GracePeriods, WatcherShared};

pub use tree::remove_redundant_prefixes;
pub use types::{RecvError, Watch, WatcherId, MAX_QUEUE_SIZE};
pub use watcher::BufferWatcher;
