//! Core types for the event backplane.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Byte separating the segments of a [`Key`].
pub const SEPARATOR: u8 = b'/';

/// Hierarchical key, segments separated by [`SEPARATOR`].
///
/// Keys order by their raw bytes. Empty segments are ignored when matching,
/// so `/a//b/` and `/a/b` name the same path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Key(pub Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    /// The root key. As a prefix it matches every key.
    pub fn root() -> Self {
        Key(vec![SEPARATOR])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-empty path segments, in order.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.as_bytes()
            .split(|b| *b == SEPARATOR)
            .filter(|segment| !segment.is_empty())
    }

    /// True if `self`, used as a watch prefix, matches `key`: every segment of
    /// `self` is the matching leading segment of `key`.
    pub fn is_prefix_of(&self, key: &Key) -> bool {
        let mut theirs = key.segments();
        self.segments().all(|ours| theirs.next() == Some(ours))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s.into_bytes())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key(b)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(self.as_bytes()) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

/// Buffer-local sequence number assigned to every emitted event.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl ItemId {
    pub fn next(self) -> Self {
        ItemId(self.0 + 1)
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease attached to a record by the backing store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub i64);

impl fmt::Debug for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeaseId({})", self.0)
    }
}

/// Post-write state of a record.
///
/// Delete events may carry an empty value; inspect [`Event::kind`] rather
/// than value emptiness.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: Key,
    pub value: Vec<u8>,
    /// Absolute expiry time, if the record has a TTL.
    pub expires: Option<SystemTime>,
    /// Assigned by the buffer on emit.
    pub id: ItemId,
    pub lease_id: Option<LeaseId>,
}

impl Item {
    pub fn new(key: impl Into<Key>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Kind of change an [`Event`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Sentinel: the watcher is caught up and now receives live events.
    Init,
    /// Create or update.
    Put,
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Init => "init",
            EventType::Put => "put",
            EventType::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A change event fanned out to watchers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub item: Item,
}

impl Event {
    /// The init sentinel. Carries an empty item.
    pub fn init() -> Self {
        Self {
            kind: EventType::Init,
            item: Item::default(),
        }
    }

    pub fn put(item: Item) -> Self {
        Self {
            kind: EventType::Put,
            item,
        }
    }

    pub fn delete(key: impl Into<Key>) -> Self {
        Self {
            kind: EventType::Delete,
            item: Item {
                key: key.into(),
                ..Default::default()
            },
        }
    }

    pub fn key(&self) -> &Key {
        &self.item.key
    }
}
