//! Per-process snapshots of globally-published entry descriptors.
//!
//! The lock-free retrieval path compares the shared bucket against the
//! snapshot taken on the last locked read; any disagreement forces a fall
//! back to the locked path. Snapshots are owned exclusively by this process
//! and need no synchronization.

use std::collections::HashMap;

/// The four descriptor fields a writer cannot change without the change
/// being visible: retiring a bucket or reusing it flips at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalEntry {
    pub shmid: i32,
    pub offset: i32,
    pub length: i32,
    pub mtime: i64,
}

#[derive(Default)]
pub struct LocalCache {
    entries: HashMap<String, LocalEntry>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<LocalEntry> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: &str, entry: LocalEntry) {
        self.entries.insert(key.to_owned(), entry);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
