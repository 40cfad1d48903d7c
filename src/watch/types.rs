//! Watch request and watcher identity types.

use crate::types::Key;
use std::fmt;
use thiserror::Error;

use super::tree::remove_redundant_prefixes;

/// Upper bound on a watcher's event queue.
pub const MAX_QUEUE_SIZE: usize = 64 * 1024;

/// A subscription request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Watch {
    /// Label used in logs.
    pub name: String,

    /// Key prefixes of interest. Empty means every key.
    pub prefixes: Vec<Key>,

    /// Event queue depth. Zero selects the buffer's default.
    pub queue_size: usize,
}

impl Watch {
    /// Watch the given prefixes with the default queue size.
    pub fn prefixes<I, K>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Clamp the queue size and drop redundant prefixes.
    pub(crate) fn sanitize(mut self, default_queue_size: usize) -> Self {
        if self.queue_size == 0 {
            self.queue_size = default_queue_size;
        }
        self.queue_size = self.queue_size.clamp(1, MAX_QUEUE_SIZE);
        self.prefixes = remove_redundant_prefixes(self.prefixes);
        self
    }
}

/// Unique identifier for a watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(pub u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a receive on a watcher returned no event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The watcher was removed. Resynchronize and subscribe again.
    #[error("watcher is closed")]
    Closed,

    #[error("no event available")]
    Empty,

    #[error("timed out waiting for event")]
    Timeout,
}
