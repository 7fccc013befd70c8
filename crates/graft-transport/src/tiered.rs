use std::sync::Arc;

use graft_types::ContentHash;
use tracing::trace;

use crate::error::TransportResult;
use crate::memory::MemoryTransport;
use crate::traits::Transport;

/// An in-memory L1 in front of another transport.
///
/// Reads hit L1 first and populate it on a miss. Writes go to both tiers;
/// `flush` only needs to reach the backing tier.
pub struct TieredTransport {
    name: String,
    l1: MemoryTransport,
    backing: Arc<dyn Transport>,
}

impl TieredTransport {
    pub fn new(backing: Arc<dyn Transport>) -> Self {
        Self {
            name: format!("tiered:{}", backing.name()),
            l1: MemoryTransport::named("l1"),
            backing,
        }
    }

    /// Fragments currently held in L1.
    pub fn cached_len(&self) -> usize {
        self.l1.len()
    }

    pub fn backing(&self) -> &Arc<dyn Transport> {
        &self.backing
    }

    pub fn clear_cache(&self) {
        self.l1.clear();
    }
}

impl Transport for TieredTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, hash: &ContentHash) -> TransportResult<Option<Vec<u8>>> {
        if let Some(fragment) = self.l1.get(hash)? {
            trace!(hash = %hash.short_hex(), "l1 hit");
            return Ok(Some(fragment));
        }
        let fragment = self.backing.get(hash)?;
        if let Some(bytes) = &fragment {
            self.l1.put(hash, bytes)?;
        }
        Ok(fragment)
    }

    fn put(&self, hash: &ContentHash, fragment: &[u8]) -> TransportResult<()> {
        self.l1.put(hash, fragment)?;
        self.backing.put(hash, fragment)
    }

    fn flush(&self) -> TransportResult<()> {
        self.backing.flush()
    }

    fn has_many(&self, hashes: &[ContentHash]) -> TransportResult<Vec<bool>> {
        let local = self.l1.has_many(hashes)?;
        let unknown: Vec<ContentHash> = hashes
            .iter()
            .zip(&local)
            .filter(|(_, hit)| !**hit)
            .map(|(h, _)| *h)
            .collect();
        if unknown.is_empty() {
            return Ok(local);
        }
        let mut remote = self.backing.has_many(&unknown)?.into_iter();
        Ok(local
            .into_iter()
            .map(|hit| hit || remote.next().unwrap_or(false))
            .collect())
    }
}
