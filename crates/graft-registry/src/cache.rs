use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Process-scoped cache published as immutable snapshots.
///
/// Readers clone the current snapshot `Arc` and look up without holding any
/// lock. Writers serialize on a dedicated mutex, build the next map from the
/// current one, and swap it in.
pub struct SnapshotCache<V> {
    snapshot: RwLock<Arc<HashMap<String, V>>>,
    writer: Mutex<()>,
}

impl<V: Clone> SnapshotCache<V> {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            writer: Mutex::new(()),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<HashMap<String, V>> {
        Arc::clone(&self.snapshot.read().expect("lock poisoned"))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.snapshot().get(key).cloned()
    }

    /// Return the cached value for `key`, computing and publishing it on a miss.
    ///
    /// `compute` runs under the writer lock, so a concurrent [`flush`] cannot
    /// be overtaken by a value computed from state older than the flush.
    ///
    /// [`flush`]: SnapshotCache::flush
    pub fn get_or_insert_with(&self, key: &str, compute: impl FnOnce() -> V) -> V {
        if let Some(v) = self.get(key) {
            return v;
        }
        let _guard = self.writer.lock().expect("lock poisoned");
        let current = self.snapshot();
        if let Some(v) = current.get(key) {
            return v.clone();
        }
        let value = compute();
        let mut next = (*current).clone();
        next.insert(key.to_string(), value.clone());
        *self.snapshot.write().expect("lock poisoned") = Arc::new(next);
        value
    }

    /// Drop every cached entry.
    pub fn flush(&self) {
        let _guard = self.writer.lock().expect("lock poisoned");
        *self.snapshot.write().expect("lock poisoned") = Arc::new(HashMap::new());
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl<V: Clone> Default for SnapshotCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn computes_once() {
        let cache = SnapshotCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = cache.get_or_insert_with("k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                42
            });
            assert_eq!(v, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn flush_forces_recompute() {
        let cache = SnapshotCache::new();
        cache.get_or_insert_with("k", || 1);
        cache.flush();
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_insert_with("k", || 2), 2);
    }

    #[test]
    fn old_snapshot_survives_writes() {
        let cache = SnapshotCache::new();
        cache.get_or_insert_with("a", || 1);
        let before = cache.snapshot();
        cache.get_or_insert_with("b", || 2);
        assert_eq!(before.len(), 1);
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[test]
    fn concurrent_readers_agree() {
        let cache = Arc::new(SnapshotCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    cache.get_or_insert_with("shared", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        7
                    })
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().expect("thread should not panic"), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
