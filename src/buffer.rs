//! Circular buffer that fans out change events to watchers.

use crate::clock::{Clock, SystemClock};
use crate::error::{BufferError, Result};
use crate::ring::EventRing;
use crate::types::{Event, ItemId};
use crate::watch::{BufferWatcher, GracePeriods, Watch, WatcherId, WatcherShared, WatcherTree};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Default number of recent events retained by the buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// How long a watcher may stay backlogged before it is evicted. Just under a
/// minute, the slowest rate at which high volume events (heartbeats) recur.
pub const DEFAULT_BACKLOG_GRACE_PERIOD: Duration = Duration::from_secs(59);

/// Backlog tolerated while a watcher is new, so large downstream caches can
/// finish their initial load.
pub const DEFAULT_CREATION_GRACE_PERIOD: Duration = Duration::from_secs(59 * 3);

/// Buffer configuration.
#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Number of recent events retained in the ring.
    pub capacity: usize,

    /// Backlog allowed for watchers past their creation window.
    pub backlog_grace_period: Duration,

    /// Backlog allowed while `now - created_at` is below this.
    ///
    /// The backlog is bounded only by time, so a new watcher that stalls can
    /// hold every matching event emitted during this window in memory.
    pub creation_grace_period: Duration,

    /// Queue size for watches that ask for zero (None = `capacity`).
    pub default_queue_size: Option<usize>,

    /// Time source for grace-period bookkeeping.
    pub clock: Arc<dyn Clock>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            backlog_grace_period: DEFAULT_BACKLOG_GRACE_PERIOD,
            creation_grace_period: DEFAULT_CREATION_GRACE_PERIOD,
            default_queue_size: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl BufferConfig {
    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(BufferError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.default_queue_size == Some(0) {
            return Err(BufferError::InvalidConfig(
                "default queue size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn grace_periods(&self) -> GracePeriods {
        GracePeriods {
            backlog: self.backlog_grace_period,
            creation: self.creation_grace_period,
        }
    }
}

/// Point-in-time buffer counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Events emitted since construction.
    pub emitted: u64,
    /// Events currently held in the ring.
    pub retained: usize,
    /// Registered watchers.
    pub watchers: usize,
    /// Watchers evicted for exceeding their backlog grace period.
    pub evicted: u64,
}

/// State guarded by the buffer mutex.
struct BufferState {
    ring: EventRing,
    last_id: ItemId,
    watchers: WatcherTree,
    initialized: bool,
    closed: bool,
    emitted: u64,
    evicted: u64,
}

pub(crate) struct BufferInner {
    config: BufferConfig,
    state: Mutex<BufferState>,
    next_watcher_id: AtomicU64,
}

impl BufferInner {
    /// Drop a watcher that closed itself.
    pub(crate) fn unregister(&self, watcher: &WatcherShared) {
        if self.state.lock().watchers.rm(watcher) {
            debug!(watcher = %watcher, "watcher closed");
        }
    }
}

/// Bounded in-memory ring of recent change events, fanned out to watchers.
///
/// The owning store calls [`emit`](Self::emit) once per committed write, in
/// commit order. `emit` never blocks: a watcher whose queue is full collects a
/// backlog, and a watcher backlogged past its grace period is evicted rather
/// than stalling the writer or the other watchers.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct CircularBuffer {
    inner: Arc<BufferInner>,
}

impl CircularBuffer {
    /// Create an uninitialized buffer. Call [`set_init`](Self::set_init) once
    /// the owning store has loaded its initial state.
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        let state = BufferState {
            ring: EventRing::new(config.capacity),
            last_id: ItemId::default(),
            watchers: WatcherTree::new(),
            initialized: false,
            closed: false,
            emitted: 0,
            evicted: 0,
        };
        Ok(Self {
            inner: Arc::new(BufferInner {
                config,
                state: Mutex::new(state),
                next_watcher_id: AtomicU64::new(1),
            }),
        })
    }

    fn now(&self) -> Instant {
        self.inner.config.clock.now()
    }

    /// Mark the buffer ready and send `Init` to every watcher registered so
    /// far. Idempotent.
    pub fn set_init(&self) {
        let mut state = self.inner.state.lock();
        if state.closed || state.initialized {
            return;
        }
        state.initialized = true;

        let now = self.now();
        let grace = self.inner.config.grace_periods();
        let watchers = state.watchers.unique();
        let overflowed: Vec<_> = watchers
            .into_iter()
            .filter(|w| !w.emit(Event::init(), now, grace))
            .collect();
        self.evict(&mut state, overflowed, now);

        info!(watchers = state.watchers.len(), "event buffer initialized");
    }

    /// Register a watcher.
    ///
    /// The queue size is clamped and redundant prefixes are dropped. If the
    /// buffer is initialized, `Init` is already queued when this returns.
    pub fn new_watcher(&self, watch: Watch) -> Result<BufferWatcher> {
        let default_queue_size = self
            .inner
            .config
            .default_queue_size
            .unwrap_or(self.inner.config.capacity);
        let watch = watch.sanitize(default_queue_size);

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(BufferError::Closed);
        }

        let now = self.now();
        let id = WatcherId(self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(WatcherShared::new(
            id,
            watch,
            now,
            Arc::downgrade(&self.inner),
        ));
        state.watchers.add(Arc::clone(&shared));

        if state.initialized {
            // Fresh queue has room for at least one event.
            shared.emit(Event::init(), now, self.inner.config.grace_periods());
        }

        debug!(
            watcher = %shared,
            initialized = state.initialized,
            "watcher registered"
        );
        Ok(BufferWatcher::new(shared))
    }

    /// Record an event and deliver it to every matching watcher.
    ///
    /// Assigns the next sequence number to `event.item.id`. Before
    /// [`set_init`](Self::set_init) events are retained but not delivered.
    /// After [`close`](Self::close) this is a no-op.
    pub fn emit(&self, event: Event) {
        let mut state = self.inner.state.lock();
        self.emit_locked(&mut state, event);
    }

    /// Emit several events under a single lock acquisition.
    pub fn emit_batch<I>(&self, events: I)
    where
        I: IntoIterator<Item = Event>,
    {
        let mut state = self.inner.state.lock();
        for event in events {
            self.emit_locked(&mut state, event);
        }
    }

    fn emit_locked(&self, state: &mut BufferState, mut event: Event) {
        if state.closed {
            trace!(key = %event.key(), "emit on closed buffer");
            return;
        }
        state.last_id = state.last_id.next();
        event.item.id = state.last_id;
        state.emitted += 1;

        if state.initialized {
            let now = self.now();
            let grace = self.inner.config.grace_periods();
            let mut overflowed = Vec::new();
            state.watchers.walk_path(event.key(), |w| {
                if !w.emit(event.clone(), now, grace) {
                    overflowed.push(Arc::clone(w));
                }
            });
            self.evict(state, overflowed, now);
        }

        state.ring.push(event);
    }

    fn evict(&self, state: &mut BufferState, watchers: Vec<Arc<WatcherShared>>, now: Instant) {
        for watcher in watchers {
            state.watchers.rm(&watcher);
            let backlog = watcher.backlog_len();
            let elapsed = watcher.backlog_age(now);
            if watcher.mark_removed() {
                state.evicted += 1;
                warn!(
                    watcher = %watcher,
                    backlog,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "closing watcher, backlog exceeded grace period"
                );
            }
        }
    }

    fn close_watchers(state: &mut BufferState) -> usize {
        let watchers = state.watchers.unique();
        let count = watchers.len();
        for watcher in watchers {
            state.watchers.rm(&watcher);
            watcher.mark_removed();
        }
        count
    }

    /// Drop all retained events and close every watcher.
    ///
    /// The buffer goes back to uninitialized: new watchers register fine but
    /// only receive `Init` after the next [`set_init`](Self::set_init).
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.ring.clear();
        state.initialized = false;
        let closed = Self::close_watchers(&mut state);
        info!(watchers = closed, "event buffer cleared");
    }

    /// Permanently shut the buffer down. Every watcher is closed and
    /// [`new_watcher`](Self::new_watcher) fails from now on.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.initialized = false;
        state.ring.clear();
        let closed = Self::close_watchers(&mut state);
        info!(watchers = closed, "event buffer closed");
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.inner.state.lock().ring.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.state.lock().watchers.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.inner.state.lock();
        BufferStats {
            emitted: state.emitted,
            retained: state.ring.len(),
            watchers: state.watchers.len(),
            evicted: state.evicted,
        }
    }
}

impl std::fmt::Debug for CircularBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircularBuffer")
            .field("capacity", &self.inner.config.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
