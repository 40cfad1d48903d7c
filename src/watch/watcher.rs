//! Per-subscriber watcher handle and its queue state.

use crate::buffer::BufferInner;
use crate::types::Event;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use super::types::{RecvError, Watch, WatcherId};

/// Backlog durations a watcher is allowed before eviction.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GracePeriods {
    pub backlog: Duration,
    pub creation: Duration,
}

/// Events that did not fit in the channel, oldest first.
#[derive(Default)]
struct Backlog {
    events: VecDeque<Event>,
    /// When the backlog last went from empty to non-empty.
    since: Option<Instant>,
}

/// Watcher state shared between the buffer and the consumer handle.
pub(crate) struct WatcherShared {
    id: WatcherId,
    watch: Watch,
    created_at: Instant,
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    backlog: Mutex<Backlog>,
    /// Dropped exactly once on removal, which wakes every `done()` receiver.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    removed: AtomicBool,
    buffer: Weak<BufferInner>,
}

impl WatcherShared {
    pub fn new(id: WatcherId, watch: Watch, created_at: Instant, buffer: Weak<BufferInner>) -> Self {
        let (sender, receiver) = bounded(watch.queue_size.max(1));
        let (done_tx, done_rx) = bounded(0);
        Self {
            id,
            watch,
            created_at,
            sender,
            receiver,
            backlog: Mutex::new(Backlog::default()),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
            removed: AtomicBool::new(false),
            buffer,
        }
    }

    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn watch(&self) -> &Watch {
        &self.watch
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().events.len()
    }

    /// How long the backlog has been non-empty.
    pub fn backlog_age(&self, now: Instant) -> Duration {
        self.backlog
            .lock()
            .since
            .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }

    /// Allowed backlog duration at `now`. Watchers still inside their
    /// creation window get the longer creation grace period.
    fn grace_period(&self, now: Instant, grace: GracePeriods) -> Duration {
        if now.saturating_duration_since(self.created_at) < grace.creation {
            grace.creation
        } else {
            grace.backlog
        }
    }

    /// Move backlogged events into the channel until it is full. Returns true
    /// once the backlog is empty.
    fn flush(&self, backlog: &mut Backlog) -> bool {
        while let Some(event) = backlog.events.pop_front() {
            match self.sender.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) | Err(TrySendError::Disconnected(event)) => {
                    backlog.events.push_front(event);
                    return false;
                }
            }
        }
        backlog.since = None;
        true
    }

    pub fn flush_backlog(&self) {
        let mut backlog = self.backlog.lock();
        self.flush(&mut backlog);
    }

    /// Queue an event without blocking. Returns false if the watcher has been
    /// backlogged past its grace period and must be evicted.
    pub fn emit(&self, event: Event, now: Instant, grace: GracePeriods) -> bool {
        if self.is_removed() {
            return true;
        }
        let mut backlog = self.backlog.lock();
        if !self.flush(&mut backlog) {
            let since = *backlog.since.get_or_insert(now);
            if now.saturating_duration_since(since) > self.grace_period(now, grace) {
                return false;
            }
            backlog.events.push_back(event);
            return true;
        }
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) | Err(TrySendError::Disconnected(event)) => {
                backlog.since = Some(now);
                backlog.events.push_back(event);
            }
        }
        true
    }

    /// Flag the watcher removed and fire `done`. Only the first caller wins.
    pub fn mark_removed(&self) -> bool {
        if self
            .removed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.done_tx.lock().take();
        self.backlog.lock().events.clear();
        true
    }
}

impl fmt::Display for WatcherShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefixes: Vec<String> = self.watch.prefixes.iter().map(|p| p.to_string()).collect();
        write!(
            f,
            "Watcher(id={}, name={}, prefixes=[{}], queue={})",
            self.id,
            self.watch.name,
            prefixes.join(", "),
            self.watch.queue_size
        )
    }
}

/// A live subscription to a [`CircularBuffer`](crate::CircularBuffer).
///
/// Events arrive in emission order. Read them with [`recv`](Self::recv) or
/// select on [`events`](Self::events) together with [`done`](Self::done).
/// Once `done` fires no further events are delivered and the consumer should
/// resynchronize from current state before watching again.
///
/// Events that did not fit in the queue wait in a backlog that is only moved
/// into the channel by [`events`](Self::events), the `recv` family, or a
/// later emit. A receiver cloned out of `events()` and read on its own never
/// triggers that move, so it can stall behind the backlog until the watcher
/// is evicted. Call `events()` again for every receive.
///
/// Dropping the handle closes the watcher.
pub struct BufferWatcher {
    shared: Arc<WatcherShared>,
}

impl BufferWatcher {
    pub(crate) fn new(shared: Arc<WatcherShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> WatcherId {
        self.shared.id
    }

    /// The sanitized watch this watcher was registered with.
    pub fn watch(&self) -> &Watch {
        &self.shared.watch
    }

    /// Event channel.
    ///
    /// Moves any backlog into the channel first, so call this again for every
    /// receive rather than keeping the returned receiver around.
    pub fn events(&self) -> &Receiver<Event> {
        self.shared.flush_backlog();
        &self.shared.receiver
    }

    /// Disconnects (yields `Err(RecvError)`) once the watcher is removed.
    pub fn done(&self) -> &Receiver<()> {
        &self.shared.done_rx
    }

    pub fn is_done(&self) -> bool {
        self.shared.is_removed()
    }

    /// Block until the next event or until the watcher is closed.
    pub fn recv(&self) -> Result<Event, RecvError> {
        if self.is_done() {
            return Err(RecvError::Closed);
        }
        select! {
            recv(self.events()) -> event => event.map_err(|_| RecvError::Closed),
            recv(self.done()) -> _ => Err(RecvError::Closed),
        }
    }

    /// Take the next event if one is ready.
    pub fn try_recv(&self) -> Result<Event, RecvError> {
        if self.is_done() {
            return Err(RecvError::Closed);
        }
        self.events().try_recv().map_err(|_| RecvError::Empty)
    }

    /// Like [`recv`](Self::recv), giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, RecvError> {
        if self.is_done() {
            return Err(RecvError::Closed);
        }
        select! {
            recv(self.events()) -> event => event.map_err(|_| RecvError::Closed),
            recv(self.done()) -> _ => Err(RecvError::Closed),
            default(timeout) => Err(RecvError::Timeout),
        }
    }

    /// Remove the watcher from its buffer and fire `done`. Idempotent, and
    /// safe to race with eviction by the buffer.
    pub fn close(&self) {
        if !self.shared.mark_removed() {
            return;
        }
        if let Some(buffer) = self.shared.buffer.upgrade() {
            buffer.unregister(&self.shared);
        }
    }
}

impl fmt::Display for BufferWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.shared, f)
    }
}

impl fmt::Debug for BufferWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferWatcher")
            .field("id", &self.shared.id)
            .field("watch", &self.shared.watch)
            .field("done", &self.is_done())
            .finish()
    }
}

impl Drop for BufferWatcher {
    fn drop(&mut self) {
        self.close();
    }
}
