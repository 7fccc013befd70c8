//! End-to-end tests: SDK operations over memory, SQLite and HTTP transports.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use graft_codec::fragment::{parse_fragment, reference_target, CLOSURE_KEY};
use graft_codec::ClosureTable;
use graft_sdk::{
    receive, send, Composer, ContentHash, Decomposer, Graft, GraftConfig, MemoryTransport, Node,
    RemoteConfig, RemoteTransport, SdkError, SqliteConfig, SqliteTransport, Transport, TypeChain,
    TypeRegistry, Value,
};
use graft_server::{GraftServer, ServerConfig};
use graft_transport::TransportResult;
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

// ----------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    fn start(config: ServerConfig) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                GraftServer::new(config)
                    .serve_on(listener, async {
                        let _ = rx.await;
                    })
                    .await
                    .unwrap();
            });
        });

        Self {
            addr,
            shutdown: Some(tx),
            thread: Some(thread),
        }
    }

    fn remote(&self, namespace: &str) -> RemoteConfig {
        RemoteConfig {
            base_url: format!("http://{}", self.addr),
            namespace: namespace.into(),
            ..RemoteConfig::default()
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Counts the hashes requested through `get` and `get_many`.
struct CountingTransport {
    inner: MemoryTransport,
    requested: AtomicUsize,
}

impl CountingTransport {
    fn new() -> Self {
        Self {
            inner: MemoryTransport::named("counting"),
            requested: AtomicUsize::new(0),
        }
    }

    fn requested(&self) -> usize {
        self.requested.load(Ordering::SeqCst)
    }
}

impl Transport for CountingTransport {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, hash: &ContentHash) -> TransportResult<Option<Vec<u8>>> {
        self.requested.fetch_add(1, Ordering::SeqCst);
        self.inner.get(hash)
    }

    fn put(&self, hash: &ContentHash, fragment: &[u8]) -> TransportResult<()> {
        self.inner.put(hash, fragment)
    }

    fn flush(&self) -> TransportResult<()> {
        self.inner.flush()
    }

    fn get_many(&self, hashes: &[ContentHash]) -> TransportResult<Vec<Option<Vec<u8>>>> {
        self.requested.fetch_add(hashes.len(), Ordering::SeqCst);
        self.inner.get_many(hashes)
    }
}

fn registry() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::new())
}

fn point(x: i64, y: i64) -> Node {
    Node::new(TypeChain::parse("Objects.Point").unwrap())
        .with("x", x)
        .unwrap()
        .with("y", y)
        .unwrap()
}

/// A small model: two walls sharing a level, with a chunked vertex list.
fn model() -> Node {
    let level = Arc::new(
        Node::new(TypeChain::parse("Objects.Level").unwrap())
            .with("elevation", 3.0)
            .unwrap(),
    );
    let wall = |name: &str, x: i64| {
        Node::new(TypeChain::parse("Objects.Wall:Objects.Element").unwrap())
            .with("name", name)
            .unwrap()
            .with("@start", point(x, 0))
            .unwrap()
            .with("@end", point(x, 10))
            .unwrap()
            .with("@level", Value::Node(Arc::clone(&level)))
            .unwrap()
    };
    let vertices: Vec<Value> = (0..250).map(|i| Value::from(i as f64 * 0.5)).collect();
    Node::new(TypeChain::parse("Objects.Model").unwrap())
        .with("@walls", vec![Value::from(wall("north", 0)), Value::from(wall("south", 5))])
        .unwrap()
        .with("@(100)vertices", vertices)
        .unwrap()
        .with("units", "m")
        .unwrap()
}

fn closure_of(transport: &dyn Transport, root: &ContentHash) -> HashSet<ContentHash> {
    let bytes = transport.get(root).unwrap().unwrap();
    ClosureTable::of_fragment(root, &bytes)
        .unwrap()
        .hashes()
        .into_iter()
        .collect()
}

/// Every hash reachable from `root` by following references.
fn reachable(transport: &dyn Transport, root: &ContentHash) -> HashSet<ContentHash> {
    fn visit(value: &JsonValue, out: &mut Vec<ContentHash>) {
        if let Some(target) = reference_target(value) {
            out.push(target.unwrap());
            return;
        }
        match value {
            JsonValue::Array(items) => items.iter().for_each(|v| visit(v, out)),
            JsonValue::Object(map) => map.values().for_each(|v| visit(v, out)),
            _ => {}
        }
    }

    let mut seen = HashSet::new();
    let mut stack = vec![*root];
    while let Some(hash) = stack.pop() {
        let bytes = transport.get(&hash).unwrap().unwrap();
        let mut body = parse_fragment(&hash, &bytes).unwrap();
        body.remove(CLOSURE_KEY);
        let mut next = Vec::new();
        body.values().for_each(|v| visit(v, &mut next));
        for child in next {
            if seen.insert(child) {
                stack.push(child);
            }
        }
    }
    seen
}

// ----------------------------------------------------------------
// Local transports
// ----------------------------------------------------------------

#[test]
fn memory_roundtrip() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let graft =
        Graft::with_transports(GraftConfig::default(), registry(), transport, None).unwrap();
    let root = graft.send(&model()).unwrap().root;
    assert_eq!(graft.receive(&root).unwrap(), model());
}

#[test]
fn sqlite_roundtrip_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = SqliteConfig {
        base_path: dir.path().to_path_buf(),
        ..SqliteConfig::default()
    };
    let decomposer = Decomposer::new(registry());
    let root = {
        let sqlite: Arc<dyn Transport> = Arc::new(SqliteTransport::open(&config).unwrap());
        send(&decomposer, &model(), &[sqlite]).unwrap().root
    };

    let sqlite: Arc<dyn Transport> = Arc::new(SqliteTransport::open(&config).unwrap());
    let graft = Graft::with_transports(GraftConfig::default(), registry(), sqlite, None).unwrap();
    assert_eq!(graft.receive(&root).unwrap(), model());
}

#[test]
fn identical_graphs_hash_identically() {
    let a = Decomposer::new(registry());
    let b = Decomposer::new(registry());
    let first = MemoryTransport::new();
    let second = MemoryTransport::new();
    let root_a = a.decompose(&model(), &first).unwrap().root;
    let root_b = b.decompose(&model(), &second).unwrap().root;
    assert_eq!(root_a, root_b);
    assert_eq!(first.all_hashes(), second.all_hashes());
    assert_eq!(a.compute_id(&model()).unwrap(), root_a);
}

#[test]
fn shared_children_are_stored_once() {
    let transport = MemoryTransport::new();
    let outcome = Decomposer::new(registry())
        .decompose(&model(), &transport)
        .unwrap();
    // root, two walls, four points, one level, three vertex chunks
    assert_eq!(transport.len(), 11);
    assert_eq!(outcome.closure.len(), 10);
}

#[test]
fn closure_covers_every_reachable_fragment() {
    let transport = MemoryTransport::new();
    let root = Decomposer::new(registry())
        .decompose(&model(), &transport)
        .unwrap()
        .root;
    let reachable = reachable(&transport, &root);
    assert_eq!(closure_of(&transport, &root), reachable);

    let stored: HashSet<ContentHash> = transport.all_hashes().into_iter().collect();
    assert!(reachable.is_subset(&stored));
}

#[test]
fn fan_out_send_writes_every_target() {
    let targets: Vec<Arc<MemoryTransport>> =
        (0..3).map(|i| Arc::new(MemoryTransport::named(format!("t{i}")))).collect();
    let dyn_targets: Vec<Arc<dyn Transport>> = targets
        .iter()
        .map(|t| Arc::clone(t) as Arc<dyn Transport>)
        .collect();
    let outcome = send(&Decomposer::new(registry()), &model(), &dyn_targets).unwrap();
    for target in &targets {
        assert!(target.contains(&outcome.root));
        assert_eq!(target.all_hashes(), targets[0].all_hashes());
    }
}

#[test]
fn send_without_targets_is_rejected() {
    let err = send(&Decomposer::new(registry()), &model(), &[]).unwrap_err();
    assert!(matches!(err, SdkError::InvalidOperation(_)));
}

// ----------------------------------------------------------------
// Receive with a local cache
// ----------------------------------------------------------------

#[test]
fn receive_copies_into_local_then_stays_local() {
    let remote = Arc::new(CountingTransport::new());
    let root = send(
        &Decomposer::new(registry()),
        &model(),
        &[Arc::clone(&remote) as Arc<dyn Transport>],
    )
    .unwrap()
    .root;

    let local = Arc::new(MemoryTransport::named("local"));
    let graft = Graft::with_transports(
        GraftConfig::default(),
        registry(),
        Arc::clone(&local) as Arc<dyn Transport>,
        Some(Arc::clone(&remote) as Arc<dyn Transport>),
    )
    .unwrap();

    assert_eq!(graft.receive(&root).unwrap(), model());
    assert_eq!(local.len(), 11);
    assert_eq!(local.flush_count(), 1);
    // the root once, then each closure entry once
    assert_eq!(remote.requested(), 11);

    assert_eq!(graft.receive(&root).unwrap(), model());
    assert_eq!(remote.requested(), 11);
}

#[test]
fn receive_fetches_only_missing_entries() {
    let remote = Arc::new(CountingTransport::new());
    let local = Arc::new(MemoryTransport::named("local"));
    let decomposer = Decomposer::new(registry());
    let root = send(
        &decomposer,
        &model(),
        &[Arc::clone(&remote) as Arc<dyn Transport>],
    )
    .unwrap()
    .root;

    // a partial cache: the root and one child are missing locally
    let missing: Vec<ContentHash> = closure_of(&remote.inner, &root).into_iter().take(1).collect();
    let present: Vec<(ContentHash, Vec<u8>)> = remote
        .inner
        .all_hashes()
        .into_iter()
        .filter(|h| *h != root && !missing.contains(h))
        .map(|h| (h, remote.inner.get(&h).unwrap().unwrap()))
        .collect();
    local.put_many(&present).unwrap();

    let composed = receive(
        &Composer::new(registry()),
        &root,
        Some(&(Arc::clone(&remote) as Arc<dyn Transport>)),
        &(Arc::clone(&local) as Arc<dyn Transport>),
    )
    .unwrap();
    assert_eq!(composed, model());
    assert_eq!(remote.requested(), 2);
    assert_eq!(local.len(), 11);
}

#[test]
fn receive_reports_missing_children() {
    let remote = Arc::new(MemoryTransport::named("remote"));
    let root = send(
        &Decomposer::new(registry()),
        &model(),
        &[Arc::clone(&remote) as Arc<dyn Transport>],
    )
    .unwrap()
    .root;
    let gone: Vec<ContentHash> = closure_of(remote.as_ref(), &root).into_iter().take(2).collect();
    for hash in &gone {
        assert!(remote.remove(hash));
    }

    let graft = Graft::with_transports(
        GraftConfig::default(),
        registry(),
        Arc::new(MemoryTransport::named("local")),
        Some(remote),
    )
    .unwrap();
    match graft.receive(&root) {
        Err(SdkError::Compose(err)) => {
            let mut missing = err.missing();
            missing.sort();
            let mut expected = gone.clone();
            expected.sort();
            assert_eq!(missing, expected);
        }
        other => panic!("expected compose error, got {other:?}"),
    }
}

#[test]
fn receive_without_remote_reports_missing_root() {
    let graft = Graft::in_memory(registry()).unwrap();
    let root = Decomposer::new(registry()).compute_id(&model()).unwrap();
    match graft.receive(&root) {
        Err(SdkError::Compose(err)) => assert_eq!(err.missing(), vec![root]),
        other => panic!("expected compose error, got {other:?}"),
    }
}

// ----------------------------------------------------------------
// HTTP
// ----------------------------------------------------------------

#[test]
fn http_roundtrip_through_server() {
    let server = TestServer::start(ServerConfig::default());
    let remote = server.remote("project");
    RemoteTransport::new(remote.clone()).unwrap().ping().unwrap();

    let sender = Graft::with_transports(
        GraftConfig::default(),
        registry(),
        Arc::new(MemoryTransport::named("sender")),
        Some(Arc::new(RemoteTransport::new(remote.clone()).unwrap())),
    )
    .unwrap();
    let outcome = sender.send(&model()).unwrap();

    let local = Arc::new(MemoryTransport::named("receiver"));
    let receiver = Graft::with_transports(
        GraftConfig::default(),
        registry(),
        Arc::clone(&local) as Arc<dyn Transport>,
        Some(Arc::new(RemoteTransport::new(remote).unwrap())),
    )
    .unwrap();
    assert_eq!(receiver.receive(&outcome.root).unwrap(), model());
    assert_eq!(local.len(), outcome.closure.len() + 1);
}

#[test]
fn http_roundtrip_uncompressed_with_small_batches() {
    let server = TestServer::start(ServerConfig::default());
    let remote = RemoteConfig {
        compress_uploads: false,
        get_batch_size: 2,
        has_batch_size: 3,
        max_request_bytes: 512,
        ..server.remote("small")
    };
    let transport: Arc<dyn Transport> = Arc::new(RemoteTransport::new(remote).unwrap());
    let root = send(&Decomposer::new(registry()), &model(), &[Arc::clone(&transport)])
        .unwrap()
        .root;

    let local: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let composed = receive(
        &Composer::new(registry()),
        &root,
        Some(&transport),
        &local,
    )
    .unwrap();
    assert_eq!(composed, model());
}

#[test]
fn http_token_is_required() {
    let server = TestServer::start(ServerConfig {
        auth_token: Some("s3cret".into()),
        ..ServerConfig::default()
    });
    let decomposer = Decomposer::new(registry());

    let anonymous: Arc<dyn Transport> =
        Arc::new(RemoteTransport::new(server.remote("secure")).unwrap());
    assert!(send(&decomposer, &point(1, 2), &[anonymous]).is_err());

    let authorized: Arc<dyn Transport> = Arc::new(
        RemoteTransport::new(RemoteConfig {
            token: Some("s3cret".into()),
            ..server.remote("secure")
        })
        .unwrap(),
    );
    let root = send(&decomposer, &point(1, 2), &[Arc::clone(&authorized)])
        .unwrap()
        .root;
    assert!(authorized.get(&root).unwrap().is_some());
}
