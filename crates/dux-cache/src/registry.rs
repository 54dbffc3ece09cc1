//! Cache registry (C3): process-wide mapping from absolute path to cache
//! entry, ownership arbitration, and prefix invalidation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use dux_config::log_registry_debug;
use dux_config::path::is_prefix_or_equal;

use crate::entry::CacheEntry;

/// Process-wide cache of per-path computations. Cheap to clone (internally
/// an `Arc`-free `DashMap` wrapped once); share one instance across every
/// session and sizer.
pub struct Registry {
    map: DashMap<PathBuf, Arc<CacheEntry>>,
    created: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            created: AtomicU64::new(0),
        }
    }

    /// Atomically look up or insert the entry for `path`. `existed = false`
    /// means the caller owns the computation and must spawn a sizer;
    /// `existed = true` means another task already owns it. Two concurrent
    /// calls for the same path are guaranteed to see exactly one
    /// `existed = false` — `DashMap::entry` locks the owning shard for the
    /// duration of the match, so there's no separate look-up-then-insert
    /// race window.
    pub fn get_or_create(&self, path: PathBuf) -> (Arc<CacheEntry>, bool) {
        match self.map.entry(path.clone()) {
            MapEntry::Occupied(existing) => (existing.get().clone(), true),
            MapEntry::Vacant(vacant) => {
                let entry = Arc::new(CacheEntry::new(path));
                vacant.insert(entry.clone());
                self.created.fetch_add(1, Ordering::Relaxed);
                (entry, false)
            }
        }
    }

    /// Look up an existing entry without creating one.
    pub fn get(&self, path: &Path) -> Option<Arc<CacheEntry>> {
        self.map.get(path).map(|e| e.clone())
    }

    /// Remove `prefix` and every entry whose key has `prefix` as a proper
    /// path-component prefix. Entries mid-computation are orphaned: their
    /// sizer keeps running to completion (it holds an `Arc`, not a lookup),
    /// but the result is no longer reachable via the registry (inv. 6).
    pub fn invalidate(&self, prefix: &Path) {
        let before = self.map.len();
        self.map.retain(|path, _entry| !is_prefix_or_equal(path, prefix));
        let removed = before.saturating_sub(self.map.len());
        log_registry_debug!("invalidated prefix", prefix = %prefix.display(), removed = removed);
    }

    /// Number of entries ever created (i.e. every `existed = false` return
    /// from `get_or_create`). Test instrumentation for "the sizer for `p`
    /// ran exactly once" (§8 property 2).
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_first_call_owns() {
        let registry = Registry::new();
        let (_entry, existed) = registry.get_or_create(PathBuf::from("/a"));
        assert!(!existed);
        assert_eq!(registry.created_count(), 1);
    }

    #[test]
    fn get_or_create_second_call_subscribes() {
        let registry = Registry::new();
        let (first, _) = registry.get_or_create(PathBuf::from("/a"));
        let (second, existed) = registry.get_or_create(PathBuf::from("/a"));
        assert!(existed);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.created_count(), 1);
    }

    #[test]
    fn invalidate_removes_exact_and_descendants() {
        let registry = Registry::new();
        registry.get_or_create(PathBuf::from("/a"));
        registry.get_or_create(PathBuf::from("/a/b"));
        registry.get_or_create(PathBuf::from("/a/b/c"));
        registry.get_or_create(PathBuf::from("/a-sibling"));

        registry.invalidate(Path::new("/a"));

        assert!(registry.get(Path::new("/a")).is_none());
        assert!(registry.get(Path::new("/a/b")).is_none());
        assert!(registry.get(Path::new("/a/b/c")).is_none());
        // "/a-sibling" is not a descendant of "/a" (no separator boundary)
        assert!(registry.get(Path::new("/a-sibling")).is_some());
    }

    #[test]
    fn invalidate_then_recreate_is_a_fresh_entry() {
        let registry = Registry::new();
        registry.get_or_create(PathBuf::from("/a"));
        registry.invalidate(Path::new("/a"));

        let (_entry, existed) = registry.get_or_create(PathBuf::from("/a"));
        assert!(!existed);
        assert_eq!(registry.created_count(), 2);
    }

    #[test]
    fn concurrent_get_or_create_creates_exactly_once() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let registry = StdArc::new(Registry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(thread::spawn(move || {
                registry.get_or_create(PathBuf::from("/shared")).1
            }));
        }

        let existed_flags: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let owners = existed_flags.iter().filter(|existed| !**existed).count();
        assert_eq!(owners, 1);
        assert_eq!(registry.created_count(), 1);
    }
}
