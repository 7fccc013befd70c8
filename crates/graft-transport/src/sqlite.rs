use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use graft_types::ContentHash;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::traits::Transport;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS objects (
    hash TEXT PRIMARY KEY,
    content BLOB NOT NULL
) WITHOUT ROWID;";

/// Configuration for [`SqliteTransport`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Directory holding one database file per scope.
    pub base_path: PathBuf,
    /// Database file stem; fragments of different scopes never mix.
    pub scope: String,
    /// Pending rows that trigger a commit.
    pub max_batch_rows: usize,
    /// Age of the oldest pending row that triggers a commit on the next put.
    pub commit_interval_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(".graft"),
            scope: "objects".into(),
            max_batch_rows: 1000,
            commit_interval_ms: 500,
        }
    }
}

impl SqliteConfig {
    /// Path of the database file for this scope.
    pub fn db_path(&self) -> PathBuf {
        self.base_path.join(format!("{}.db", self.scope))
    }
}

struct Inner {
    conn: Connection,
    pending: HashMap<ContentHash, Vec<u8>>,
    batch_started: Option<Instant>,
}

/// Local persistent transport backed by a single SQLite file.
///
/// Puts are buffered and written in one transaction when the batch reaches
/// `max_batch_rows`, when a put arrives after `commit_interval_ms`, on
/// `flush`, or when the transport is dropped. Gets see buffered puts.
pub struct SqliteTransport {
    name: String,
    path: Option<PathBuf>,
    max_batch_rows: usize,
    commit_interval: Duration,
    inner: Mutex<Inner>,
}

impl SqliteTransport {
    /// Open or create the database for `config.scope` under `config.base_path`.
    pub fn open(config: &SqliteConfig) -> TransportResult<Self> {
        validate_scope(&config.scope)?;
        std::fs::create_dir_all(&config.base_path)?;
        let path = config.db_path();
        info!(path = %path.display(), "opening sqlite transport");

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn, config, Some(path))
    }

    /// An in-memory database (for testing).
    pub fn open_in_memory(scope: &str) -> TransportResult<Self> {
        let config = SqliteConfig {
            scope: scope.to_string(),
            ..SqliteConfig::default()
        };
        Self::with_connection(Connection::open_in_memory()?, &config, None)
    }

    fn with_connection(
        conn: Connection,
        config: &SqliteConfig,
        path: Option<PathBuf>,
    ) -> TransportResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            name: format!("sqlite:{}", config.scope),
            path,
            max_batch_rows: config.max_batch_rows.max(1),
            commit_interval: Duration::from_millis(config.commit_interval_ms),
            inner: Mutex::new(Inner {
                conn,
                pending: HashMap::new(),
                batch_started: None,
            }),
        })
    }

    /// The database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rows buffered but not yet committed.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").pending.len()
    }

    /// Number of committed fragments.
    pub fn count(&self) -> TransportResult<u64> {
        let inner = self.inner.lock().expect("lock poisoned");
        let n: i64 = inner
            .conn
            .query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Total bytes of committed fragments.
    pub fn total_bytes(&self) -> TransportResult<u64> {
        let inner = self.inner.lock().expect("lock poisoned");
        let n: i64 = inner.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(content)), 0) FROM objects",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Committed hashes, sorted.
    pub fn hashes(&self) -> TransportResult<Vec<ContentHash>> {
        let inner = self.inner.lock().expect("lock poisoned");
        let mut stmt = inner.conn.prepare("SELECT hash FROM objects ORDER BY hash")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut hashes = Vec::new();
        for row in rows {
            let hex = row?;
            let hash = ContentHash::from_hex(&hex)
                .map_err(|e| TransportError::Protocol(format!("bad stored hash {hex}: {e}")))?;
            hashes.push(hash);
        }
        Ok(hashes)
    }
}

fn commit(inner: &mut Inner) -> TransportResult<usize> {
    if inner.pending.is_empty() {
        return Ok(0);
    }
    let Inner { conn, pending, batch_started } = inner;
    let tx = conn.transaction()?;
    {
        let mut stmt =
            tx.prepare_cached("INSERT OR IGNORE INTO objects (hash, content) VALUES (?1, ?2)")?;
        for (hash, content) in pending.iter() {
            stmt.execute(params![hash.to_hex(), content])?;
        }
    }
    tx.commit()?;
    let written = pending.len();
    pending.clear();
    *batch_started = None;
    debug!(rows = written, "committed sqlite batch");
    Ok(written)
}

fn lookup(conn: &Connection, hash: &ContentHash) -> TransportResult<Option<Vec<u8>>> {
    let mut stmt = conn.prepare_cached("SELECT content FROM objects WHERE hash = ?1")?;
    Ok(stmt
        .query_row([hash.to_hex()], |row| row.get::<_, Vec<u8>>(0))
        .optional()?)
}

fn validate_scope(scope: &str) -> TransportResult<()> {
    let valid = !scope.is_empty()
        && scope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TransportError::Internal(format!("invalid sqlite scope {scope:?}")))
    }
}

impl Transport for SqliteTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, hash: &ContentHash) -> TransportResult<Option<Vec<u8>>> {
        let inner = self.inner.lock().expect("lock poisoned");
        if let Some(fragment) = inner.pending.get(hash) {
            return Ok(Some(fragment.clone()));
        }
        lookup(&inner.conn, hash)
    }

    fn put(&self, hash: &ContentHash, fragment: &[u8]) -> TransportResult<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner
            .pending
            .entry(*hash)
            .or_insert_with(|| fragment.to_vec());
        let started = *inner.batch_started.get_or_insert_with(Instant::now);
        if inner.pending.len() >= self.max_batch_rows || started.elapsed() >= self.commit_interval {
            commit(&mut inner)?;
        }
        Ok(())
    }

    fn flush(&self) -> TransportResult<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        commit(&mut inner)?;
        Ok(())
    }

    fn has_many(&self, hashes: &[ContentHash]) -> TransportResult<Vec<bool>> {
        let inner = self.inner.lock().expect("lock poisoned");
        let mut stmt = inner
            .conn
            .prepare_cached("SELECT 1 FROM objects WHERE hash = ?1")?;
        let mut present = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let found = inner.pending.contains_key(hash)
                || stmt
                    .query_row([hash.to_hex()], |_| Ok(()))
                    .optional()?
                    .is_some();
            present.push(found);
        }
        Ok(present)
    }

    fn get_many(&self, hashes: &[ContentHash]) -> TransportResult<Vec<Option<Vec<u8>>>> {
        let inner = self.inner.lock().expect("lock poisoned");
        hashes
            .iter()
            .map(|hash| match inner.pending.get(hash) {
                Some(fragment) => Ok(Some(fragment.clone())),
                None => lookup(&inner.conn, hash),
            })
            .collect()
    }
}

impl Drop for SqliteTransport {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.get_mut() {
            if let Err(e) = commit(inner) {
                warn!(transport = %self.name, error = %e, "failed to commit pending rows on drop");
            }
        }
    }
}

impl std::fmt::Debug for SqliteTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTransport")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}
