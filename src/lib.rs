//! # Event Backplane
//!
//! A bounded, in-memory ring buffer that fans out ordered key-value change
//! events to any number of concurrent, prefix-filtered watchers.
//!
//! ## Core Concepts
//!
//! - **Events**: `Put`/`Delete` changes to hierarchical keys, plus the `Init`
//!   sentinel each watcher sees first
//! - **Ring**: only the most recent `capacity` events are retained
//! - **Watchers**: per-subscriber bounded queues filtered by key prefix
//! - **Grace periods**: a watcher that stays backlogged too long is evicted
//!   instead of stalling the writer
//!
//! ## Example
//!
//! ```ignore
//! use backplane::{BufferConfig, CircularBuffer, Event, Item, Watch};
//!
//! let buffer = CircularBuffer::new(BufferConfig::default())?;
//! buffer.set_init();
//!
//! let watcher = buffer.new_watcher(Watch::prefixes(["/nodes"]))?;
//! let init = watcher.recv()?; // EventType::Init
//!
//! buffer.emit(Event::put(Item::new("/nodes/a", b"up".to_vec())));
//! let event = watcher.recv()?;
//! ```

pub mod buffer;
pub mod clock;
pub mod error;
pub mod ring;
pub mod types;
pub mod watch;

// Re-exports
pub use buffer::{
    BufferConfig, BufferStats, CircularBuffer, DEFAULT_BACKLOG_GRACE_PERIOD,
    DEFAULT_BUFFER_CAPACITY, DEFAULT_CREATION_GRACE_PERIOD,
};
pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{BufferError, Result};
pub use ring::EventRing;
pub use types::*;
pub use watch::{remove_redundant_prefixes, BufferWatcher, RecvError, Watch, WatcherId};
