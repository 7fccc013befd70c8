use graft_types::ContentHash;

use crate::error::TransportResult;

/// Store of serialized fragments keyed by content hash.
///
/// All implementations must satisfy these invariants:
/// - `put` is idempotent. The same hash always maps to the same bytes, so a
///   second put of a stored hash is a no-op.
/// - Writes may be buffered. When `flush` returns, every prior `put` is
///   durable and visible to `get` through any handle on the same store.
/// - `get` returns `Ok(None)` only when the store was reached and does not
///   hold the hash. An unreachable store is `TransportError::Unavailable`.
/// - The transport never interprets fragment contents.
pub trait Transport: Send + Sync {
    /// Short human-readable name, used in logs and errors.
    fn name(&self) -> &str;

    fn get(&self, hash: &ContentHash) -> TransportResult<Option<Vec<u8>>>;

    fn put(&self, hash: &ContentHash, fragment: &[u8]) -> TransportResult<()>;

    /// Barrier: returns once all prior puts are durable.
    fn flush(&self) -> TransportResult<()>;

    /// Presence check for many hashes, in input order.
    ///
    /// Default implementation calls `get()` for each hash. Backends should
    /// override with a cheaper lookup.
    fn has_many(&self, hashes: &[ContentHash]) -> TransportResult<Vec<bool>> {
        hashes
            .iter()
            .map(|h| self.get(h).map(|f| f.is_some()))
            .collect()
    }

    /// Fetch many fragments, in input order.
    ///
    /// Default implementation calls `get()` for each hash.
    fn get_many(&self, hashes: &[ContentHash]) -> TransportResult<Vec<Option<Vec<u8>>>> {
        hashes.iter().map(|h| self.get(h)).collect()
    }

    /// Store many fragments.
    ///
    /// Default implementation calls `put()` for each fragment.
    fn put_many(&self, fragments: &[(ContentHash, Vec<u8>)]) -> TransportResult<()> {
        for (hash, fragment) in fragments {
            self.put(hash, fragment)?;
        }
        Ok(())
    }
}
