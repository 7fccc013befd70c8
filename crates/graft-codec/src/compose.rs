use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll};
use std::thread;
use std::time::Instant;

use graft_pool::{CancellationToken, Promise, TaskError, WorkerPool};
use graft_registry::TypeRegistry;
use graft_transport::Transport;
use graft_types::{is_transient, ContentHash, DetachPolicy, Member, Node, TypeChain, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::error::{ComposeError, FragmentError};
use crate::fragment::{
    self, ClosureTable, FormatVersion, CHUNK_DATA_KEY, CHUNK_TYPE, CLOSURE_KEY, ID_KEY,
    REFERENCE_TYPE, TYPE_KEY,
};

/// Configuration for [`Composer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Force a strategy instead of detecting it from the root.
    pub format: Option<FormatVersion>,
    /// Prefetch closure entries through the worker pool for `V2` roots.
    pub prefetch: bool,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            format: None,
            prefetch: true,
        }
    }
}

/// Rebuilds node graphs from fragments.
///
/// Every hash is fetched and decoded at most once per composition, so a
/// fragment shared by many parents yields one shared [`Arc<Node>`]. For
/// `V2` roots the closure table is walked deepest-first on the worker pool
/// while the root is decoded; `V1` roots resolve references as they are met.
pub struct Composer {
    registry: Arc<TypeRegistry>,
    pool: Option<Arc<WorkerPool>>,
    config: ComposerConfig,
    cancel: CancellationToken,
}

impl Composer {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            pool: None,
            config: ComposerConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_config(mut self, config: ComposerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cancellation token with the caller. Cancelling it aborts
    /// every composition this composer runs.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Rebuild the graph stored under `root`.
    pub fn compose(
        &self,
        root: &ContentHash,
        transport: Arc<dyn Transport>,
    ) -> Result<Node, ComposeError> {
        let session = self.session(transport, CancellationToken::new());
        let body = session.fetch_root(root)?;
        session.run(*root, body, self.pool.as_ref(), &self.config)
    }

    /// Fetch the root, then finish the composition on a background thread.
    ///
    /// Fails immediately if the root itself cannot be read.
    pub fn compose_async(
        &self,
        root: &ContentHash,
        transport: Arc<dyn Transport>,
    ) -> Result<ComposeHandle, ComposeError> {
        let call_cancel = CancellationToken::new();
        let session = self.session(transport, call_cancel.clone());
        let body = session.fetch_root(root)?;

        let promise: Promise<Result<Node, ComposeError>> = Promise::new();
        let producer = promise.clone();
        let pool = self.pool.clone();
        let config = self.config.clone();
        let root = *root;

        let background = Arc::clone(&session);
        let spawned = thread::Builder::new()
            .name("graft-compose".into())
            .spawn(move || {
                producer.complete(Ok(background.run(root, body, pool.as_ref(), &config)));
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn compose thread");
            promise.complete(Ok(Err(ComposeError::single(
                root,
                FragmentError::Internal {
                    hash: root,
                    reason: format!("could not spawn compose thread: {e}"),
                },
            ))));
        }

        Ok(ComposeHandle {
            root,
            promise,
            cancel: call_cancel,
        })
    }

    fn session(
        &self,
        transport: Arc<dyn Transport>,
        call_cancel: CancellationToken,
    ) -> Arc<Session> {
        Arc::new(Session {
            registry: Arc::clone(&self.registry),
            transport,
            cancel: [self.cancel.clone(), call_cancel],
            cells: Mutex::new(HashMap::new()),
            failures: Mutex::new(Failures::default()),
            fetched: AtomicUsize::new(0),
        })
    }
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

/// A composition running in the background.
pub struct ComposeHandle {
    root: ContentHash,
    promise: Promise<Result<Node, ComposeError>>,
    cancel: CancellationToken,
}

impl ComposeHandle {
    pub fn root(&self) -> ContentHash {
        self.root
    }

    /// Abort this composition. Fragments already decoded are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.promise.is_complete()
    }

    /// Block until the composition finishes.
    pub fn wait(self) -> Result<Node, ComposeError> {
        flatten(self.root, self.promise.wait())
    }
}

impl Future for ComposeHandle {
    type Output = Result<Node, ComposeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let root = self.root;
        Pin::new(&mut self.promise)
            .poll(cx)
            .map(|result| flatten(root, result))
    }
}

fn flatten(
    root: ContentHash,
    result: Result<Result<Node, ComposeError>, TaskError>,
) -> Result<Node, ComposeError> {
    match result {
        Ok(composed) => composed,
        Err(TaskError::Cancelled) => Err(ComposeError::single(root, FragmentError::Cancelled)),
        Err(e) => Err(ComposeError::single(
            root,
            FragmentError::Internal {
                hash: root,
                reason: e.to_string(),
            },
        )),
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Resolved {
    Node(Arc<Node>),
    Chunk(Arc<Vec<Value>>),
}

enum CellState {
    Empty,
    Running,
    Done(Option<Resolved>),
}

enum Claim {
    Done(Option<Resolved>),
    /// The caller now owns the cell and must fill it.
    Claimed,
}

/// Memo slot for one hash. The first thread to claim it decodes; the rest
/// wait on `ready`.
struct Cell {
    state: Mutex<CellState>,
    ready: Condvar,
}

impl Cell {
    fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Empty),
            ready: Condvar::new(),
        }
    }

    fn claim(&self) -> Claim {
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            match &*state {
                CellState::Done(result) => return Claim::Done(result.clone()),
                CellState::Running => state = self.ready.wait(state).expect("lock poisoned"),
                CellState::Empty => {
                    *state = CellState::Running;
                    return Claim::Claimed;
                }
            }
        }
    }

    fn fill(&self, result: Option<Resolved>) {
        *self.state.lock().expect("lock poisoned") = CellState::Done(result);
        self.ready.notify_all();
    }
}

/// Fills a claimed cell with a failure if decoding unwinds.
struct ClaimGuard<'a> {
    session: &'a Session,
    cell: &'a Cell,
    hash: ContentHash,
    filled: bool,
}

impl ClaimGuard<'_> {
    fn finish(mut self, result: Option<Resolved>) -> Option<Resolved> {
        self.cell.fill(result.clone());
        self.filled = true;
        result
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.filled {
            self.session.fail(FragmentError::Internal {
                hash: self.hash,
                reason: "decoder panicked".into(),
            });
            self.cell.fill(None);
        }
    }
}

#[derive(Default)]
struct Failures {
    list: Vec<FragmentError>,
    seen: HashSet<Option<ContentHash>>,
}

struct Session {
    registry: Arc<TypeRegistry>,
    transport: Arc<dyn Transport>,
    cancel: [CancellationToken; 2],
    cells: Mutex<HashMap<ContentHash, Arc<Cell>>>,
    failures: Mutex<Failures>,
    fetched: AtomicUsize,
}

impl Session {
    fn is_cancelled(&self) -> bool {
        self.cancel.iter().any(CancellationToken::is_cancelled)
    }

    /// Record a failure. Only the first failure per hash is kept.
    fn fail(&self, failure: FragmentError) {
        let mut failures = self.failures.lock().expect("lock poisoned");
        if failures.seen.insert(failure.hash()) {
            debug!(error = %failure, "fragment failed");
            failures.list.push(failure);
        }
    }

    fn take_failures(&self) -> Vec<FragmentError> {
        std::mem::take(&mut self.failures.lock().expect("lock poisoned").list)
    }

    fn fetch(&self, hash: &ContentHash) -> Result<Map<String, JsonValue>, FragmentError> {
        if self.is_cancelled() {
            return Err(FragmentError::Cancelled);
        }
        let bytes = self
            .transport
            .get(hash)
            .map_err(|source| FragmentError::from_transport(*hash, source))?
            .ok_or(FragmentError::NotFound { hash: *hash })?;
        self.fetched.fetch_add(1, Ordering::Relaxed);
        fragment::parse_fragment(hash, &bytes)
    }

    fn fetch_root(&self, root: &ContentHash) -> Result<Map<String, JsonValue>, ComposeError> {
        self.fetch(root)
            .map_err(|failure| ComposeError::single(*root, failure))
    }

    fn run(
        self: &Arc<Self>,
        root: ContentHash,
        body: Map<String, JsonValue>,
        pool: Option<&Arc<WorkerPool>>,
        config: &ComposerConfig,
    ) -> Result<Node, ComposeError> {
        let started = Instant::now();
        let format = config.format.unwrap_or_else(|| FormatVersion::of(&body));

        let mut prefetched = Vec::new();
        if format == FormatVersion::V2 && config.prefetch {
            let closure = match body.get(CLOSURE_KEY) {
                Some(value) => ClosureTable::from_json(value).unwrap_or_else(|reason| {
                    self.fail(FragmentError::malformed(root, CLOSURE_KEY, reason));
                    ClosureTable::new()
                }),
                None => ClosureTable::new(),
            };
            for hash in closure.deepest_first() {
                if self.is_cancelled() {
                    break;
                }
                match pool {
                    Some(pool) => {
                        let session = Arc::clone(self);
                        prefetched.push(pool.submit(&self.cancel[1], move || {
                            session.resolve(&hash);
                        }));
                    }
                    None => {
                        self.resolve(&hash);
                    }
                }
            }
        }

        let resolved = self.resolve_body(&root, body);
        for handle in prefetched {
            // failures are recorded by the session; only wait for completion
            let _ = handle.join();
        }
        self.cells.lock().expect("lock poisoned").clear();

        if self.is_cancelled() {
            self.fail(FragmentError::Cancelled);
        }
        let failures = self.take_failures();
        let fetched = self.fetched.load(Ordering::Relaxed);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if !failures.is_empty() {
            warn!(
                root = %root.short_hex(),
                failures = failures.len(),
                fetched,
                elapsed_ms,
                "composition failed"
            );
            return Err(ComposeError::new(root, failures));
        }

        match resolved {
            Some(Resolved::Node(node)) => {
                info!(
                    root = %root.short_hex(),
                    %format,
                    fetched,
                    elapsed_ms,
                    "composed graph"
                );
                Ok(Arc::try_unwrap(node).unwrap_or_else(|shared| (*shared).clone()))
            }
            Some(Resolved::Chunk(_)) => Err(ComposeError::single(
                root,
                FragmentError::malformed(root, TYPE_KEY, "root is a chunk"),
            )),
            None => Err(ComposeError::single(
                root,
                FragmentError::Internal {
                    hash: root,
                    reason: "root did not resolve".into(),
                },
            )),
        }
    }

    fn cell(&self, hash: &ContentHash) -> Arc<Cell> {
        let mut cells = self.cells.lock().expect("lock poisoned");
        Arc::clone(cells.entry(*hash).or_insert_with(|| Arc::new(Cell::new())))
    }

    /// Fetch and decode `hash`, or wait for whoever already is.
    fn resolve(&self, hash: &ContentHash) -> Option<Resolved> {
        let cell = self.cell(hash);
        if let Claim::Done(done) = cell.claim() {
            return done;
        }
        let guard = ClaimGuard {
            session: self,
            cell: &cell,
            hash: *hash,
            filled: false,
        };
        let result = match self.fetch(hash) {
            Ok(body) => self.decode_fragment(hash, &body),
            Err(failure) => {
                self.fail(failure);
                None
            }
        };
        guard.finish(result)
    }

    /// Decode a body that has already been fetched.
    fn resolve_body(
        &self,
        hash: &ContentHash,
        body: Map<String, JsonValue>,
    ) -> Option<Resolved> {
        let cell = self.cell(hash);
        if let Claim::Done(done) = cell.claim() {
            return done;
        }
        let guard = ClaimGuard {
            session: self,
            cell: &cell,
            hash: *hash,
            filled: false,
        };
        let result = self.decode_fragment(hash, &body);
        guard.finish(result)
    }

    fn decode_fragment(
        &self,
        hash: &ContentHash,
        body: &Map<String, JsonValue>,
    ) -> Option<Resolved> {
        match fragment::discriminator(body) {
            None => {
                self.fail(FragmentError::malformed(*hash, TYPE_KEY, "missing discriminator"));
                None
            }
            Some(CHUNK_TYPE) => {
                let Some(items) = body.get(CHUNK_DATA_KEY).and_then(JsonValue::as_array) else {
                    self.fail(FragmentError::malformed(
                        *hash,
                        CHUNK_DATA_KEY,
                        "chunk without data",
                    ));
                    return None;
                };
                self.decode_list(hash, items, CHUNK_DATA_KEY, DetachPolicy::Inline)
                    .map(|values| Resolved::Chunk(Arc::new(values)))
            }
            Some(REFERENCE_TYPE) => {
                let target = self.reference(hash, &JsonValue::Object(body.clone()), "$")?;
                self.resolve(&target)
            }
            Some(_) => self
                .decode_node(hash, body, "")
                .map(|node| Resolved::Node(Arc::new(node))),
        }
    }

    /// Decode a node object, running member coercion and post-decode hooks.
    /// Returns `None` if anything inside it failed.
    fn decode_node(
        &self,
        hash: &ContentHash,
        object: &Map<String, JsonValue>,
        path: &str,
    ) -> Option<Node> {
        let discriminator = fragment::discriminator(object).unwrap_or_default();
        let chain = TypeChain::from_stored(discriminator);
        let table = self.registry.members(discriminator);
        let hooks = self.registry.hooks(discriminator);

        let mut node = Node::new(chain);
        let mut complete = true;
        for (key, raw) in object {
            if key == TYPE_KEY || key == ID_KEY || is_transient(key) {
                continue;
            }
            let accessor = table.find(key);
            let policy = accessor
                .map(|a| a.policy())
                .unwrap_or_else(|| DetachPolicy::from_member_name(key));
            let Some(value) = self.decode_value(hash, raw, &join(path, key), policy) else {
                complete = false;
                continue;
            };
            match accessor {
                Some(accessor) => match accessor.accept(value) {
                    Ok(value) => node.insert_unchecked(Member::declared(accessor.name(), value)),
                    Err(source) => {
                        self.fail(FragmentError::Member { hash: *hash, source });
                        complete = false;
                    }
                },
                None => node.insert_unchecked(Member::dynamic(key.as_str(), value)),
            }
        }
        if !complete {
            return None;
        }

        for hook in hooks.iter() {
            if let Err(source) = hook.run(&mut node) {
                self.fail(FragmentError::Hook {
                    type_name: discriminator.to_string(),
                    hash: *hash,
                    source,
                });
                return None;
            }
        }
        Some(node)
    }

    fn decode_value(
        &self,
        hash: &ContentHash,
        raw: &JsonValue,
        path: &str,
        policy: DetachPolicy,
    ) -> Option<Value> {
        match raw {
            JsonValue::Null => Some(Value::Null),
            JsonValue::Bool(b) => Some(Value::Bool(*b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Int(i)),
                // out of i64 range: keep the magnitude as a float
                None => n.as_f64().map(Value::Float).or_else(|| {
                    self.fail(FragmentError::malformed(*hash, path, "unrepresentable number"));
                    None
                }),
            },
            JsonValue::String(s) => Some(Value::String(s.clone())),
            JsonValue::Array(items) => self.decode_list(hash, items, path, policy).map(Value::List),
            JsonValue::Object(object) => match fragment::discriminator(object) {
                Some(REFERENCE_TYPE) => {
                    let target = self.reference(hash, raw, path)?;
                    match self.resolve(&target)? {
                        Resolved::Node(node) => Some(Value::Node(node)),
                        Resolved::Chunk(_) => {
                            self.fail(FragmentError::malformed(
                                *hash,
                                path,
                                "chunk referenced outside a list",
                            ));
                            None
                        }
                    }
                }
                Some(_) => self
                    .decode_node(hash, object, path)
                    .map(|node| Value::Node(Arc::new(node))),
                None => {
                    let element_policy = policy.for_elements();
                    let mut entries = Vec::with_capacity(object.len());
                    let mut complete = true;
                    for (key, item) in object {
                        match self.decode_value(hash, item, &join(path, key), element_policy) {
                            Some(value) => entries.push((key.clone(), value)),
                            None => complete = false,
                        }
                    }
                    complete.then_some(Value::Map(entries))
                }
            },
        }
    }

    /// Decode a list, splicing referenced chunks in place.
    fn decode_list(
        &self,
        hash: &ContentHash,
        items: &[JsonValue],
        path: &str,
        policy: DetachPolicy,
    ) -> Option<Vec<Value>> {
        let element_policy = policy.for_elements();
        let mut out = Vec::with_capacity(items.len());
        let mut complete = true;
        for (i, item) in items.iter().enumerate() {
            if fragment::reference_target(item).is_some() {
                let Some(target) = self.reference(hash, item, &format!("{path}[{i}]")) else {
                    complete = false;
                    continue;
                };
                match self.resolve(&target) {
                    Some(Resolved::Chunk(values)) => out.extend(values.iter().cloned()),
                    Some(Resolved::Node(node)) => out.push(Value::Node(node)),
                    None => complete = false,
                }
                continue;
            }
            if policy.is_chunked() {
                self.fail(FragmentError::malformed(
                    *hash,
                    format!("{path}[{i}]"),
                    "chunked member holds an element that is not a chunk reference",
                ));
                complete = false;
                continue;
            }
            match self.decode_value(hash, item, &format!("{path}[{i}]"), element_policy) {
                Some(value) => out.push(value),
                None => complete = false,
            }
        }
        complete.then_some(out)
    }

    fn reference(&self, hash: &ContentHash, raw: &JsonValue, path: &str) -> Option<ContentHash> {
        match fragment::reference_target(raw)? {
            Ok(target) => Some(target),
            Err(reason) => {
                self.fail(FragmentError::malformed(*hash, path, reason));
                None
            }
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
