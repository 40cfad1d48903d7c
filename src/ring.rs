//! Fixed-capacity ring of the most recently emitted events.

use crate::types::Event;
use std::collections::VecDeque;

/// Holds at most `capacity` events; pushing into a full ring overwrites the
/// oldest slot.
#[derive(Debug)]
pub struct EventRing {
    slots: VecDeque<Event>,
    capacity: usize,
}

impl EventRing {
    /// Create an empty ring. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event, returning the one it displaced, if any.
    pub fn push(&mut self, event: Event) -> Option<Event> {
        let evicted = if self.slots.len() == self.capacity {
            self.slots.pop_front()
        } else {
            None
        };
        self.slots.push_back(event);
        evicted
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Events oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.slots.iter()
    }
}
