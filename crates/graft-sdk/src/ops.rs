//! Free-standing send and receive operations.
//!
//! These work on any transports and take the codec objects by reference, so
//! callers that manage their own registries and pools can use them without
//! going through [`Graft`](crate::Graft).

use std::sync::Arc;
use std::time::Instant;

use graft_codec::fragment::{self, CLOSURE_KEY};
use graft_codec::{ClosureTable, Composer, DecomposeOutcome, Decomposer, FragmentError};
use graft_transport::{FanOutTransport, Transport};
use graft_types::{ContentHash, Node};
use tracing::{debug, info};

use crate::error::{SdkError, SdkResult};

/// Decompose `root` into every target.
///
/// With several targets every fragment goes to all of them; the first
/// failing target aborts the send.
pub fn send(
    decomposer: &Decomposer,
    root: &Node,
    targets: &[Arc<dyn Transport>],
) -> SdkResult<DecomposeOutcome> {
    match targets {
        [] => Err(SdkError::InvalidOperation("send needs at least one transport".into())),
        [only] => Ok(decomposer.decompose(root, only.as_ref())?),
        many => {
            let fan_out = FanOutTransport::new(many.to_vec())?;
            Ok(decomposer.decompose(root, &fan_out)?)
        }
    }
}

/// Compose the graph stored under `root`, preferring `local`.
///
/// If `local` already holds the root and everything in its closure, the
/// remote is never contacted. Otherwise the root and the missing closure
/// entries are copied from `remote` into `local`, which is flushed before
/// composing from it. Roots written without a closure cannot be copied
/// ahead of time and are composed straight from whichever side holds them.
pub fn receive(
    composer: &Composer,
    root: &ContentHash,
    remote: Option<&Arc<dyn Transport>>,
    local: &Arc<dyn Transport>,
) -> SdkResult<Node> {
    let started = Instant::now();

    if let Some(bytes) = local.get(root)? {
        let closure = read_closure(root, &bytes)?;
        let missing = match &closure {
            Some(closure) => missing_from(local.as_ref(), closure)?,
            None => Vec::new(),
        };
        match remote {
            Some(remote) if !missing.is_empty() => {
                copy(remote.as_ref(), local.as_ref(), &missing, None)?;
            }
            _ => debug!(root = %root.short_hex(), "receiving from local transport"),
        }
        return compose(composer, root, Arc::clone(local), started);
    }

    let Some(remote) = remote else {
        // Reports the missing root through the usual compose error.
        return compose(composer, root, Arc::clone(local), started);
    };
    let bytes = remote
        .get(root)?
        .ok_or(FragmentError::NotFound { hash: *root })?;
    match read_closure(root, &bytes)? {
        Some(closure) => {
            let missing = missing_from(local.as_ref(), &closure)?;
            copy(remote.as_ref(), local.as_ref(), &missing, Some((root, bytes)))?;
            compose(composer, root, Arc::clone(local), started)
        }
        None => {
            debug!(root = %root.short_hex(), "root has no closure; composing from remote");
            compose(composer, root, Arc::clone(remote), started)
        }
    }
}

fn compose(
    composer: &Composer,
    root: &ContentHash,
    transport: Arc<dyn Transport>,
    started: Instant,
) -> SdkResult<Node> {
    let name = transport.name().to_string();
    let node = composer.compose(root, transport)?;
    info!(
        root = %root.short_hex(),
        transport = %name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "received graph"
    );
    Ok(node)
}

/// `None` when the fragment has no closure table at all.
fn read_closure(hash: &ContentHash, bytes: &[u8]) -> SdkResult<Option<ClosureTable>> {
    let body = fragment::parse_fragment(hash, bytes)?;
    if !body.contains_key(CLOSURE_KEY) {
        return Ok(None);
    }
    Ok(Some(ClosureTable::of_fragment(hash, bytes)?))
}

fn missing_from(transport: &dyn Transport, closure: &ClosureTable) -> SdkResult<Vec<ContentHash>> {
    let hashes = closure.hashes();
    let present = transport.has_many(&hashes)?;
    Ok(hashes
        .into_iter()
        .zip(present)
        .filter_map(|(hash, present)| (!present).then_some(hash))
        .collect())
}

/// Copy `hashes` from `from` to `to`, then the root if given, then flush.
///
/// Hashes the source does not have are skipped; composing afterwards
/// reports them as missing.
fn copy(
    from: &dyn Transport,
    to: &dyn Transport,
    hashes: &[ContentHash],
    root: Option<(&ContentHash, Vec<u8>)>,
) -> SdkResult<()> {
    let started = Instant::now();
    let mut fragments: Vec<(ContentHash, Vec<u8>)> = hashes
        .iter()
        .zip(from.get_many(hashes)?)
        .filter_map(|(hash, bytes)| bytes.map(|b| (*hash, b)))
        .collect();
    let skipped = hashes.len() - fragments.len();
    if let Some((hash, bytes)) = root {
        fragments.push((*hash, bytes));
    }
    let bytes: usize = fragments.iter().map(|(_, b)| b.len()).sum();
    to.put_many(&fragments)?;
    to.flush()?;
    info!(
        from = from.name(),
        to = to.name(),
        copied = fragments.len(),
        skipped,
        bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "copied fragments"
    );
    Ok(())
}
