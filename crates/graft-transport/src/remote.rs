use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use graft_types::ContentHash;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{is_transient_status, TransportError, TransportResult};
use crate::traits::Transport;
use crate::wire::{self, HasObjectsResponse, ObjectsRequest, UploadResponse};

const MIB: usize = 1024 * 1024;

/// Configuration for [`RemoteTransport`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Server root, e.g. `http://127.0.0.1:7878`.
    pub base_url: String,
    /// Object namespace on the server.
    pub namespace: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// Largest single fragment accepted by `put`.
    pub max_fragment_bytes: usize,
    /// Uncompressed bytes buffered before an upload request is sent.
    pub max_request_bytes: usize,
    /// Hashes per bulk-download request.
    pub get_batch_size: usize,
    /// Hashes per presence request.
    pub has_batch_size: usize,
    /// Bytes per ranged request when downloading a single fragment.
    pub download_window: usize,
    /// Attempts after the first for transient failures.
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    /// zstd-compress upload bodies.
    pub compress_uploads: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7878".into(),
            namespace: "default".into(),
            token: None,
            timeout_secs: 30,
            max_fragment_bytes: 25 * MIB,
            max_request_bytes: 25 * MIB,
            get_batch_size: 10_000,
            has_batch_size: 100_000,
            download_window: MIB,
            retry_count: 3,
            retry_backoff_ms: 250,
            compress_uploads: true,
        }
    }
}

#[derive(Default)]
struct Pending {
    fragments: Vec<(ContentHash, Vec<u8>)>,
    index: HashMap<ContentHash, usize>,
    bytes: usize,
}

impl Pending {
    fn take(&mut self) -> Vec<(ContentHash, Vec<u8>)> {
        self.index.clear();
        self.bytes = 0;
        std::mem::take(&mut self.fragments)
    }

    fn push(&mut self, hash: ContentHash, fragment: Vec<u8>) {
        if self.index.contains_key(&hash) {
            return;
        }
        self.index.insert(hash, self.fragments.len());
        self.bytes += fragment.len();
        self.fragments.push((hash, fragment));
    }

    fn get(&self, hash: &ContentHash) -> Option<&Vec<u8>> {
        self.index.get(hash).map(|&i| &self.fragments[i].1)
    }
}

/// Outcome of one attempt at a remote call.
enum Attempt {
    Retry(String),
    Fail(TransportError),
}

impl From<TransportError> for Attempt {
    fn from(e: TransportError) -> Self {
        Attempt::Fail(e)
    }
}

/// Transport backed by a Graft object server over HTTP.
///
/// Puts are buffered and uploaded in batches on `flush` or when the buffer
/// reaches `max_request_bytes`; fragments the server already holds are
/// skipped after a presence check. Single fragments are downloaded in
/// `download_window`-sized ranges, and a failed window is retried from its
/// offset. Connection failures, timeouts, and 408/502/503/504 answers are
/// retried `retry_count` times before surfacing as
/// [`TransportError::Unavailable`].
pub struct RemoteTransport {
    name: String,
    config: RemoteConfig,
    client: Client,
    pending: Mutex<Pending>,
}

impl RemoteTransport {
    pub fn new(config: RemoteConfig) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::Internal(format!("failed to build HTTP client: {e}")))?;
        info!(url = %config.base_url, namespace = %config.namespace, "remote transport ready");
        Ok(Self {
            name: format!("remote:{}", config.namespace),
            config,
            client,
            pending: Mutex::new(Pending::default()),
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Check that the server answers its health endpoint.
    pub fn ping(&self) -> TransportResult<()> {
        let url = self.url("v1/health");
        self.with_retry("ping", || {
            let resp = self.send(self.client.get(&url))?;
            expect_success(resp, &url).map(|_| ())
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, Attempt> {
        let request = match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let resp = request.send().map_err(classify)?;
        let status = resp.status().as_u16();
        if is_transient_status(status) {
            return Err(Attempt::Retry(format!("HTTP {status}")));
        }
        Ok(resp)
    }

    fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, Attempt>,
    ) -> TransportResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry(reason)) if attempt < self.config.retry_count => {
                    attempt += 1;
                    warn!(transport = %self.name, what, attempt, %reason, "retrying");
                    std::thread::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * u64::from(attempt),
                    ));
                }
                Err(Attempt::Retry(reason)) => {
                    return Err(TransportError::unavailable(
                        self.name.clone(),
                        format!("{what}: {reason} after {} retries", self.config.retry_count),
                    ));
                }
            }
        }
    }

    /// Download one fragment window by window.
    fn download(&self, hash: &ContentHash) -> TransportResult<Option<Vec<u8>>> {
        let url = self.url(&format!("objects/{}/{}/single", self.config.namespace, hash));
        let window = self.config.download_window.max(1);
        let mut body: Vec<u8> = Vec::new();
        loop {
            let start = body.len();
            let end = start + window - 1;
            let chunk = self.with_retry("download", || {
                let resp = self.send(
                    self.client
                        .get(&url)
                        .header(RANGE, format!("bytes={start}-{end}")),
                )?;
                match resp.status() {
                    StatusCode::NOT_FOUND => Ok(None),
                    StatusCode::OK => {
                        let bytes = resp.bytes().map_err(classify)?;
                        Ok(Some((bytes.to_vec(), None)))
                    }
                    StatusCode::PARTIAL_CONTENT => {
                        let range = resp
                            .headers()
                            .get(CONTENT_RANGE)
                            .and_then(|v| v.to_str().ok())
                            .and_then(wire::parse_content_range)
                            .ok_or_else(|| {
                                TransportError::Protocol(format!("{url}: bad Content-Range"))
                            })?;
                        let bytes = resp.bytes().map_err(classify)?;
                        Ok(Some((bytes.to_vec(), Some(range))))
                    }
                    status => Err(Attempt::Fail(TransportError::Http {
                        status: status.as_u16(),
                        url: url.clone(),
                    })),
                }
            })?;

            match chunk {
                None => return Ok(None),
                // Server ignored the range and sent the whole fragment.
                Some((bytes, None)) => return Ok(Some(bytes)),
                Some((bytes, Some((from, _, total)))) => {
                    if from != start {
                        return Err(TransportError::Protocol(format!(
                            "{url}: asked for offset {start}, got {from}"
                        )));
                    }
                    body.extend_from_slice(&bytes);
                    if body.len() >= total {
                        debug!(hash = %hash.short_hex(), bytes = total, "downloaded fragment");
                        return Ok(Some(body));
                    }
                    if bytes.is_empty() {
                        return Err(TransportError::Protocol(format!(
                            "{url}: empty window at offset {start} of {total}"
                        )));
                    }
                }
            }
        }
    }

    fn remote_has(&self, hashes: &[ContentHash]) -> TransportResult<Vec<bool>> {
        let url = self.url(&format!("api/diff/{}", self.config.namespace));
        let mut present = Vec::with_capacity(hashes.len());
        for batch in hashes.chunks(self.config.has_batch_size.max(1)) {
            let request = ObjectsRequest {
                objects: batch.to_vec(),
            };
            let answer: HasObjectsResponse = self.with_retry("diff", || {
                let resp = self.send(self.client.post(&url).json(&request))?;
                let resp = expect_success(resp, &url)?;
                resp.json().map_err(classify)
            })?;
            if answer.present.len() != batch.len() {
                return Err(TransportError::Protocol(format!(
                    "{url}: asked about {} hashes, got {} answers",
                    batch.len(),
                    answer.present.len()
                )));
            }
            present.extend(answer.present);
        }
        Ok(present)
    }

    fn remote_get_many(
        &self,
        hashes: &[ContentHash],
    ) -> TransportResult<HashMap<ContentHash, Vec<u8>>> {
        let url = self.url(&format!("api/getobjects/{}", self.config.namespace));
        let mut found = HashMap::with_capacity(hashes.len());
        for batch in hashes.chunks(self.config.get_batch_size.max(1)) {
            let request = ObjectsRequest {
                objects: batch.to_vec(),
            };
            let body = self.with_retry("getobjects", || {
                let resp = self.send(
                    self.client
                        .post(&url)
                        .header(ACCEPT_ENCODING, wire::ZSTD_ENCODING)
                        .json(&request),
                )?;
                let resp = expect_success(resp, &url)?;
                let compressed = is_zstd(&resp);
                let bytes = resp.bytes().map_err(classify)?;
                if compressed {
                    Ok(wire::decompress(&bytes)?)
                } else {
                    Ok(bytes.to_vec())
                }
            })?;
            found.extend(wire::decode_lines(&body)?);
        }
        Ok(found)
    }

    /// Upload fragments the server does not hold yet.
    fn upload(&self, fragments: &[(ContentHash, Vec<u8>)]) -> TransportResult<usize> {
        if fragments.is_empty() {
            return Ok(0);
        }
        let hashes: Vec<ContentHash> = fragments.iter().map(|(h, _)| *h).collect();
        let present = self.remote_has(&hashes)?;
        let missing: Vec<&(ContentHash, Vec<u8>)> = fragments
            .iter()
            .zip(present)
            .filter(|(_, p)| !p)
            .map(|(f, _)| f)
            .collect();

        let url = self.url(&format!("objects/{}", self.config.namespace));
        let mut stored = 0;
        for batch in split_by_bytes(&missing, self.config.max_request_bytes) {
            let lines = wire::encode_lines(batch.iter().map(|(h, f)| (h, f.as_slice())));
            let (body, encoding) = if self.config.compress_uploads {
                (wire::compress(&lines)?, Some(wire::ZSTD_ENCODING))
            } else {
                (lines, None)
            };
            let answer: UploadResponse = self.with_retry("upload", || {
                let mut request = self
                    .client
                    .post(&url)
                    .header(CONTENT_TYPE, wire::LINES_CONTENT_TYPE)
                    .body(body.clone());
                if let Some(encoding) = encoding {
                    request = request.header(CONTENT_ENCODING, encoding);
                }
                let resp = expect_success(self.send(request)?, &url)?;
                resp.json().map_err(classify)
            })?;
            stored += answer.stored;
            debug!(
                transport = %self.name,
                fragments = batch.len(),
                bytes = body.len(),
                "uploaded batch"
            );
        }
        info!(
            transport = %self.name,
            offered = fragments.len(),
            uploaded = missing.len(),
            stored,
            "upload complete"
        );
        Ok(stored)
    }
}

fn split_by_bytes<'a>(
    fragments: &[&'a (ContentHash, Vec<u8>)],
    limit: usize,
) -> Vec<Vec<&'a (ContentHash, Vec<u8>)>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut size = 0;
    for &fragment in fragments {
        let len = fragment.1.len() + 66;
        if !current.is_empty() && size + len > limit {
            batches.push(std::mem::take(&mut current));
            size = 0;
        }
        size += len;
        current.push(fragment);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn classify(e: reqwest::Error) -> Attempt {
    if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
        Attempt::Retry(e.to_string())
    } else {
        Attempt::Fail(TransportError::Protocol(e.to_string()))
    }
}

fn expect_success(resp: Response, url: &str) -> Result<Response, Attempt> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(Attempt::Fail(TransportError::Http {
            status: resp.status().as_u16(),
            url: url.to_string(),
        }))
    }
}

fn is_zstd(resp: &Response) -> bool {
    resp.headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case(wire::ZSTD_ENCODING))
}

impl Transport for RemoteTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, hash: &ContentHash) -> TransportResult<Option<Vec<u8>>> {
        if let Some(fragment) = self.pending.lock().expect("lock poisoned").get(hash) {
            return Ok(Some(fragment.clone()));
        }
        self.download(hash)
    }

    fn put(&self, hash: &ContentHash, fragment: &[u8]) -> TransportResult<()> {
        if fragment.len() > self.config.max_fragment_bytes {
            return Err(TransportError::FragmentTooLarge {
                hash: *hash,
                size: fragment.len(),
                limit: self.config.max_fragment_bytes,
            });
        }
        let batch = {
            let mut pending = self.pending.lock().expect("lock poisoned");
            pending.push(*hash, fragment.to_vec());
            if pending.bytes < self.config.max_request_bytes {
                return Ok(());
            }
            pending.take()
        };
        self.upload_or_requeue(batch)
    }

    fn flush(&self) -> TransportResult<()> {
        let batch = self.pending.lock().expect("lock poisoned").take();
        self.upload_or_requeue(batch)
    }

    fn has_many(&self, hashes: &[ContentHash]) -> TransportResult<Vec<bool>> {
        let remote = self.remote_has(hashes)?;
        let pending = self.pending.lock().expect("lock poisoned");
        Ok(hashes
            .iter()
            .zip(remote)
            .map(|(h, present)| present || pending.get(h).is_some())
            .collect())
    }

    fn get_many(&self, hashes: &[ContentHash]) -> TransportResult<Vec<Option<Vec<u8>>>> {
        let mut found = self.remote_get_many(hashes)?;
        let pending = self.pending.lock().expect("lock poisoned");
        Ok(hashes
            .iter()
            .map(|h| found.remove(h).or_else(|| pending.get(h).cloned()))
            .collect())
    }
}

impl RemoteTransport {
    /// Upload a batch; on failure put it back so a later flush can retry.
    fn upload_or_requeue(&self, batch: Vec<(ContentHash, Vec<u8>)>) -> TransportResult<()> {
        match self.upload(&batch) {
            Ok(_) => Ok(()),
            Err(e) => {
                let mut pending = self.pending.lock().expect("lock poisoned");
                for (hash, fragment) in batch {
                    pending.push(hash, fragment);
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for RemoteTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTransport")
            .field("name", &self.name)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::from_hash([byte; 32])
    }

    fn unreachable_config() -> RemoteConfig {
        RemoteConfig {
            // Port 9 (discard) on localhost is closed on test machines.
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            retry_count: 1,
            retry_backoff_ms: 1,
            ..RemoteConfig::default()
        }
    }

    #[test]
    fn default_limits() {
        let c = RemoteConfig::default();
        assert_eq!(c.max_request_bytes, 25 * MIB);
        assert_eq!(c.get_batch_size, 10_000);
        assert_eq!(c.has_batch_size, 100_000);
        assert_eq!(c.retry_count, 3);
        assert!(c.compress_uploads);
    }

    #[test]
    fn oversized_fragment_is_rejected() {
        let t = RemoteTransport::new(RemoteConfig {
            max_fragment_bytes: 4,
            ..unreachable_config()
        })
        .unwrap();
        let err = t.put(&hash(1), b"too big").unwrap_err();
        assert!(matches!(err, TransportError::FragmentTooLarge { size: 7, limit: 4, .. }));
    }

    #[test]
    fn buffered_put_is_readable_before_flush() {
        let t = RemoteTransport::new(unreachable_config()).unwrap();
        t.put(&hash(1), b"{}").unwrap();
        assert_eq!(t.get(&hash(1)).unwrap(), Some(b"{}".to_vec()));
    }

    #[test]
    fn unreachable_server_is_unavailable() {
        let t = RemoteTransport::new(unreachable_config()).unwrap();
        let err = t.get(&hash(2)).unwrap_err();
        assert!(err.is_unavailable(), "got {err:?}");
    }

    #[test]
    fn failed_flush_keeps_fragments() {
        let t = RemoteTransport::new(unreachable_config()).unwrap();
        t.put(&hash(3), b"{}").unwrap();
        assert!(t.flush().unwrap_err().is_unavailable());
        assert_eq!(t.get(&hash(3)).unwrap(), Some(b"{}".to_vec()));
    }

    #[test]
    fn batches_split_on_byte_limit() {
        let a = (hash(1), vec![0u8; 40]);
        let b = (hash(2), vec![0u8; 40]);
        let c = (hash(3), vec![0u8; 40]);
        let refs = vec![&a, &b, &c];
        let batches = split_by_bytes(&refs, 220);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn oversized_single_fragment_gets_own_batch() {
        let a = (hash(1), vec![0u8; 500]);
        let refs = vec![&a];
        assert_eq!(split_by_bytes(&refs, 100).len(), 1);
    }
}
