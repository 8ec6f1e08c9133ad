//! Inode numbers for driver paths.
//!
//! The kernel addresses everything by inode; the operation contract by path.
//! Entries carry the FUSE lookup count and are evicted once `forget` brings
//! it to zero.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
struct InodeEntry {
    path: String,
    nlookup: u64,
}

/// Thread-safe bidirectional inode <-> path table.
pub struct InodeTable {
    by_ino: DashMap<u64, InodeEntry>,
    by_path: DashMap<String, u64>,
    next: AtomicU64,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            by_ino: DashMap::new(),
            by_path: DashMap::new(),
            next: AtomicU64::new(ROOT_INODE + 1),
        };
        table.by_ino.insert(
            ROOT_INODE,
            InodeEntry {
                path: "/".to_string(),
                nlookup: 1,
            },
        );
        table.by_path.insert("/".to_string(), ROOT_INODE);
        table
    }

    fn ensure(&self, path: &str) -> u64 {
        if let Some(ino) = self.by_path.get(path) {
            return *ino;
        }
        *self.by_path.entry(path.to_string()).or_insert_with(|| {
            let ino = self.next.fetch_add(1, Ordering::Relaxed);
            self.by_ino.insert(
                ino,
                InodeEntry {
                    path: path.to_string(),
                    nlookup: 0,
                },
            );
            ino
        })
    }

    /// Inode for `path`, allocated if needed. Counts as one kernel lookup.
    pub fn get_or_insert(&self, path: &str) -> u64 {
        let ino = self.ensure(path);
        if let Some(mut entry) = self.by_ino.get_mut(&ino) {
            entry.nlookup += 1;
        }
        ino
    }

    /// Inode for `path` without touching the lookup count (readdir entries).
    pub fn get_or_insert_no_lookup(&self, path: &str) -> u64 {
        self.ensure(path)
    }

    pub fn path(&self, ino: u64) -> Option<String> {
        self.by_ino.get(&ino).map(|entry| entry.path.clone())
    }

    pub fn inode(&self, path: &str) -> Option<u64> {
        self.by_path.get(path).map(|ino| *ino)
    }

    /// Drop `nlookup` references. Returns true if the inode was evicted.
    pub fn forget(&self, ino: u64, nlookup: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }
        let evict = match self.by_ino.get_mut(&ino) {
            Some(mut entry) => {
                entry.nlookup = entry.nlookup.saturating_sub(nlookup);
                entry.nlookup == 0
            }
            None => false,
        };
        if !evict {
            return false;
        }
        match self.by_ino.remove(&ino) {
            Some((_, entry)) => {
                self.by_path.remove_if(&entry.path, |_, mapped| *mapped == ino);
                true
            }
            None => false,
        }
    }

    /// `path` was deleted. The inode lives on until the kernel forgets it.
    pub fn remove_path(&self, path: &str) {
        self.by_path.remove(path);
    }

    /// Re-key `from` and everything below it to `to`.
    pub fn rename(&self, from: &str, to: &str) {
        let prefix = format!("{}/", from.trim_end_matches('/'));
        let moved: Vec<(String, u64)> = self
            .by_path
            .iter()
            .filter(|item| item.key() == from || item.key().starts_with(&prefix))
            .map(|item| (item.key().clone(), *item.value()))
            .collect();

        // The replaced target, if any, is no longer reachable by path.
        self.by_path.remove(to);
        for (old, _) in &moved {
            self.by_path.remove(old);
        }
        for (old, ino) in moved {
            let new = format!("{to}{}", &old[from.len()..]);
            if let Some(mut entry) = self.by_ino.get_mut(&ino) {
                entry.path = new.clone();
            }
            self.by_path.insert(new, ino);
        }
    }

    /// Number of live inodes, root included.
    pub fn len(&self) -> usize {
        self.by_ino.len()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
