use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use graft_types::ContentHash;

use crate::error::TransportResult;
use crate::traits::Transport;

/// In-memory, HashMap-based transport.
///
/// Intended for tests, caches, and embedding. Concurrent gets and puts are
/// safe; `flush` is a no-op beyond counting calls.
pub struct MemoryTransport {
    name: String,
    fragments: RwLock<HashMap<ContentHash, Vec<u8>>>,
    flushes: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fragments: RwLock::new(HashMap::new()),
            flushes: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.read().expect("lock poisoned").is_empty()
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.fragments.read().expect("lock poisoned").contains_key(hash)
    }

    /// Total bytes across all stored fragments.
    pub fn total_bytes(&self) -> usize {
        self.fragments
            .read()
            .expect("lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Remove one fragment. Returns `true` if it was present.
    pub fn remove(&self, hash: &ContentHash) -> bool {
        self.fragments
            .write()
            .expect("lock poisoned")
            .remove(hash)
            .is_some()
    }

    pub fn clear(&self) {
        self.fragments.write().expect("lock poisoned").clear();
    }

    /// Sorted list of stored hashes.
    pub fn all_hashes(&self) -> Vec<ContentHash> {
        let map = self.fragments.read().expect("lock poisoned");
        let mut hashes: Vec<ContentHash> = map.keys().copied().collect();
        hashes.sort();
        hashes
    }

    /// How many times `flush` has been called.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, hash: &ContentHash) -> TransportResult<Option<Vec<u8>>> {
        Ok(self.fragments.read().expect("lock poisoned").get(hash).cloned())
    }

    fn put(&self, hash: &ContentHash, fragment: &[u8]) -> TransportResult<()> {
        self.fragments
            .write()
            .expect("lock poisoned")
            .entry(*hash)
            .or_insert_with(|| fragment.to_vec());
        Ok(())
    }

    fn flush(&self) -> TransportResult<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_many(&self, hashes: &[ContentHash]) -> TransportResult<Vec<bool>> {
        let map = self.fragments.read().expect("lock poisoned");
        Ok(hashes.iter().map(|h| map.contains_key(h)).collect())
    }

    fn put_many(&self, fragments: &[(ContentHash, Vec<u8>)]) -> TransportResult<()> {
        let mut map = self.fragments.write().expect("lock poisoned");
        for (hash, fragment) in fragments {
            map.entry(*hash).or_insert_with(|| fragment.clone());
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("name", &self.name)
            .field("fragment_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::from_hash([byte; 32])
    }

    #[test]
    fn put_then_get() {
        let t = MemoryTransport::new();
        t.put(&hash(1), b"one").unwrap();
        assert_eq!(t.get(&hash(1)).unwrap().as_deref(), Some(&b"one"[..]));
    }

    #[test]
    fn missing_is_none() {
        let t = MemoryTransport::new();
        assert!(t.get(&hash(9)).unwrap().is_none());
    }

    #[test]
    fn put_is_idempotent() {
        let t = MemoryTransport::new();
        t.put(&hash(1), b"first").unwrap();
        t.put(&hash(1), b"first").unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.total_bytes(), 5);
    }

    #[test]
    fn has_many_in_order() {
        let t = MemoryTransport::new();
        t.put(&hash(2), b"x").unwrap();
        assert_eq!(
            t.has_many(&[hash(1), hash(2), hash(3)]).unwrap(),
            [false, true, false]
        );
    }

    #[test]
    fn get_many_uses_default() {
        let t = MemoryTransport::new();
        t.put_many(&[(hash(1), b"a".to_vec()), (hash(2), b"b".to_vec())])
            .unwrap();
        let got = t.get_many(&[hash(2), hash(3), hash(1)]).unwrap();
        assert_eq!(got, [Some(b"b".to_vec()), None, Some(b"a".to_vec())]);
    }

    #[test]
    fn flush_is_counted() {
        let t = MemoryTransport::new();
        t.flush().unwrap();
        t.flush().unwrap();
        assert_eq!(t.flush_count(), 2);
    }

    #[test]
    fn remove_and_clear() {
        let t = MemoryTransport::new();
        t.put(&hash(1), b"a").unwrap();
        t.put(&hash(2), b"b").unwrap();
        assert!(t.remove(&hash(1)));
        assert!(!t.remove(&hash(1)));
        assert_eq!(t.all_hashes(), [hash(2)]);
        t.clear();
        assert!(t.is_empty());
    }

    #[test]
    fn concurrent_puts_and_gets() {
        let t = Arc::new(MemoryTransport::new());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let t = Arc::clone(&t);
                thread::spawn(move || {
                    t.put(&hash(i), &[i]).unwrap();
                    assert_eq!(t.get(&hash(i)).unwrap(), Some(vec![i]));
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }
        assert_eq!(t.len(), 8);
    }
}
