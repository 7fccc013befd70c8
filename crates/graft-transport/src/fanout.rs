use std::sync::Arc;

use graft_types::ContentHash;

use crate::error::{TransportError, TransportResult};
use crate::traits::Transport;

/// Writes every fragment to several transports.
///
/// Reads try each transport in order and return the first hit. A put or
/// flush fails as soon as any target fails.
pub struct FanOutTransport {
    name: String,
    targets: Vec<Arc<dyn Transport>>,
}

impl FanOutTransport {
    pub fn new(targets: Vec<Arc<dyn Transport>>) -> TransportResult<Self> {
        if targets.is_empty() {
            return Err(TransportError::Internal("fan-out needs at least one target".into()));
        }
        let names: Vec<&str> = targets.iter().map(|t| t.name()).collect();
        Ok(Self {
            name: format!("fanout[{}]", names.join(",")),
            targets,
        })
    }

    pub fn targets(&self) -> &[Arc<dyn Transport>] {
        &self.targets
    }
}

impl Transport for FanOutTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, hash: &ContentHash) -> TransportResult<Option<Vec<u8>>> {
        for target in &self.targets {
            if let Some(fragment) = target.get(hash)? {
                return Ok(Some(fragment));
            }
        }
        Ok(None)
    }

    fn put(&self, hash: &ContentHash, fragment: &[u8]) -> TransportResult<()> {
        for target in &self.targets {
            target.put(hash, fragment)?;
        }
        Ok(())
    }

    fn flush(&self) -> TransportResult<()> {
        for target in &self.targets {
            target.flush()?;
        }
        Ok(())
    }
}
