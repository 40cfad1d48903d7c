//! Prefix index over registered watchers.

use crate::types::Key;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::types::WatcherId;
use super::watcher::WatcherShared;

/// Drop prefixes already covered by a shorter prefix in the same set.
///
/// The result is sorted by raw bytes. A watcher holding both `/a` and `/a/b`
/// would otherwise be visited twice for every key under `/a/b`.
pub fn remove_redundant_prefixes(mut prefixes: Vec<Key>) -> Vec<Key> {
    // Ancestors sort before their descendants when compared segment-wise.
    prefixes.sort_by(|a, b| a.segments().cmp(b.segments()).then_with(|| a.cmp(b)));
    prefixes.dedup();

    let mut kept: Vec<Key> = Vec::with_capacity(prefixes.len());
    for prefix in prefixes {
        if !kept.iter().any(|k| k.is_prefix_of(&prefix)) {
            kept.push(prefix);
        }
    }
    kept.sort();
    kept
}

#[derive(Default)]
struct Node {
    watchers: Vec<Arc<WatcherShared>>,
    children: BTreeMap<Vec<u8>, Node>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.watchers.is_empty() && self.children.is_empty()
    }

    /// Remove `id` from the node at `path`, pruning nodes left empty.
    fn remove(&mut self, path: &[&[u8]], id: WatcherId) {
        match path.split_first() {
            None => self.watchers.retain(|w| w.id() != id),
            Some((segment, rest)) => {
                let emptied = match self.children.get_mut(*segment) {
                    Some(child) => {
                        child.remove(rest, id);
                        child.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    self.children.remove(*segment);
                }
            }
        }
    }

    fn walk<F>(&self, visit: &mut F)
    where
        F: FnMut(&Arc<WatcherShared>),
    {
        for watcher in &self.watchers {
            visit(watcher);
        }
        for child in self.children.values() {
            child.walk(visit);
        }
    }
}

/// Watchers indexed by path segment.
///
/// Each node holds the watchers whose prefix ends exactly at that path, so a
/// lookup for a key only visits the nodes along that key's own path.
#[derive(Default)]
pub(crate) struct WatcherTree {
    root: Node,
    ids: HashSet<WatcherId>,
}

impl WatcherTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct registered watchers.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Insert the watcher once per prefix. No prefixes means the root.
    pub fn add(&mut self, watcher: Arc<WatcherShared>) {
        self.ids.insert(watcher.id());
        if watcher.watch().prefixes.is_empty() {
            self.root.watchers.push(watcher);
            return;
        }
        for prefix in &watcher.watch().prefixes {
            let mut node = &mut self.root;
            for segment in prefix.segments() {
                node = node.children.entry(segment.to_vec()).or_default();
            }
            node.watchers.push(Arc::clone(&watcher));
        }
    }

    /// Remove the watcher everywhere it was inserted. Returns false if it was
    /// not registered.
    pub fn rm(&mut self, watcher: &WatcherShared) -> bool {
        if !self.ids.remove(&watcher.id()) {
            return false;
        }
        let prefixes = &watcher.watch().prefixes;
        if prefixes.is_empty() {
            self.root.remove(&[], watcher.id());
        }
        for prefix in prefixes {
            let path: Vec<&[u8]> = prefix.segments().collect();
            self.root.remove(&path, watcher.id());
        }
        true
    }

    /// Visit every watcher with a prefix matching `key`, shallowest first.
    pub fn walk_path<F>(&self, key: &Key, mut visit: F)
    where
        F: FnMut(&Arc<WatcherShared>),
    {
        let mut node = &self.root;
        node.watchers.iter().for_each(&mut visit);
        for segment in key.segments() {
            match node.children.get(segment) {
                Some(child) => {
                    node = child;
                    node.watchers.iter().for_each(&mut visit);
                }
                None => break,
            }
        }
    }

    /// Visit every registration. A watcher with several prefixes is visited
    /// once per prefix.
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&Arc<WatcherShared>),
    {
        self.root.walk(&mut visit);
    }

    /// Each registered watcher exactly once.
    pub fn unique(&self) -> Vec<Arc<WatcherShared>> {
        let mut seen = HashSet::with_capacity(self.ids.len());
        let mut out = Vec::with_capacity(self.ids.len());
        self.walk(|w| {
            if seen.insert(w.id()) {
                out.push(Arc::clone(w));
            }
        });
        out
    }
}
