//! Wire formats shared by [`RemoteTransport`](crate::RemoteTransport) and the
//! Graft object server.
//!
//! Fragment batches travel as newline-delimited `hash\tfragment` lines. Compact
//! JSON never contains a raw newline or tab, so no escaping is needed. Batch
//! bodies may be zstd-compressed, signalled with `Content-Encoding: zstd`.

use graft_types::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};

/// `Content-Encoding` value for compressed batch bodies.
pub const ZSTD_ENCODING: &str = "zstd";

/// Content type of line-delimited fragment batches.
pub const LINES_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Body of a presence or bulk-download request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectsRequest {
    pub objects: Vec<ContentHash>,
}

/// Answer to a presence request, aligned with the request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasObjectsResponse {
    pub present: Vec<bool>,
}

/// Answer to an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub stored: usize,
}

/// Encode fragments as `hash\tfragment\n` lines.
pub fn encode_lines<'a, I>(fragments: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a ContentHash, &'a [u8])>,
{
    let mut out = Vec::new();
    for (hash, fragment) in fragments {
        out.extend_from_slice(hash.to_hex().as_bytes());
        out.push(b'\t');
        out.extend_from_slice(fragment);
        out.push(b'\n');
    }
    out
}

/// Decode `hash\tfragment` lines. Blank lines are skipped.
pub fn decode_lines(body: &[u8]) -> TransportResult<Vec<(ContentHash, Vec<u8>)>> {
    let mut fragments = Vec::new();
    for (lineno, line) in body.split(|b| *b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let tab = line.iter().position(|b| *b == b'\t').ok_or_else(|| {
            TransportError::Protocol(format!("line {}: missing tab separator", lineno + 1))
        })?;
        let hex = std::str::from_utf8(&line[..tab])
            .map_err(|e| TransportError::Protocol(format!("line {}: {e}", lineno + 1)))?;
        let hash = ContentHash::from_hex(hex)
            .map_err(|e| TransportError::Protocol(format!("line {}: {e}", lineno + 1)))?;
        fragments.push((hash, line[tab + 1..].to_vec()));
    }
    Ok(fragments)
}

pub fn compress(body: &[u8]) -> TransportResult<Vec<u8>> {
    Ok(zstd::encode_all(body, 0)?)
}

pub fn decompress(body: &[u8]) -> TransportResult<Vec<u8>> {
    Ok(zstd::decode_all(body)?)
}

/// Parse a single-range `Range: bytes=start-end` header against a body of
/// `len` bytes. Returns the inclusive range, clamped to the body.
pub fn parse_range(header: &str, len: usize) -> Option<(usize, usize)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') || len == 0 {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = match (start.trim(), end.trim()) {
        ("", suffix) => {
            let n: usize = suffix.parse().ok()?;
            if n == 0 {
                return None;
            }
            (len.saturating_sub(n), len - 1)
        }
        (start, "") => (start.parse().ok()?, len - 1),
        (start, end) => (start.parse().ok()?, end.parse::<usize>().ok()?.min(len - 1)),
    };
    if start > end || start >= len {
        return None;
    }
    Some((start, end))
}

/// Parse a `Content-Range: bytes start-end/total` header.
pub fn parse_content_range(header: &str) -> Option<(usize, usize, usize)> {
    let spec = header.trim().strip_prefix("bytes ")?;
    let (range, total) = spec.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?, total.parse().ok()?))
}
