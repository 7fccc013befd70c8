use std::sync::Arc;

use graft_codec::{ComposeHandle, Composer, DecomposeOutcome, Decomposer};
use graft_pool::WorkerPool;
use graft_registry::TypeRegistry;
use graft_transport::{MemoryTransport, RemoteTransport, SqliteTransport, Transport};
use graft_types::{ContentHash, Node};
use tracing::info;

use crate::config::GraftConfig;
use crate::error::SdkResult;
use crate::ops;

/// A ready-to-use Graft client.
///
/// Owns the type registry, one decomposer and one composer sharing a worker
/// pool, a local fragment cache and, optionally, a remote object server.
pub struct Graft {
    registry: Arc<TypeRegistry>,
    decomposer: Decomposer,
    composer: Composer,
    local: Arc<dyn Transport>,
    remote: Option<Arc<dyn Transport>>,
    config: GraftConfig,
}

impl Graft {
    /// Open the SQLite cache and remote described by `config`.
    pub fn open(config: GraftConfig, registry: Arc<TypeRegistry>) -> SdkResult<Self> {
        let local: Arc<dyn Transport> = Arc::new(SqliteTransport::open(&config.local)?);
        let remote: Option<Arc<dyn Transport>> = match &config.remote {
            Some(remote) => Some(Arc::new(RemoteTransport::new(remote.clone())?)),
            None => None,
        };
        let graft = Self::assemble(config, registry, local, remote)?;
        info!(
            local = graft.local.name(),
            remote = graft.remote.as_ref().map(|r| r.name()),
            "opened graft"
        );
        Ok(graft)
    }

    /// A client with a memory cache and no remote.
    pub fn in_memory(registry: Arc<TypeRegistry>) -> SdkResult<Self> {
        let local = Arc::new(MemoryTransport::named("memory:local"));
        Self::with_transports(GraftConfig::default(), registry, local, None)
    }

    /// A client over caller-supplied transports.
    pub fn with_transports(
        config: GraftConfig,
        registry: Arc<TypeRegistry>,
        local: Arc<dyn Transport>,
        remote: Option<Arc<dyn Transport>>,
    ) -> SdkResult<Self> {
        Self::assemble(config, registry, local, remote)
    }

    fn assemble(
        config: GraftConfig,
        registry: Arc<TypeRegistry>,
        local: Arc<dyn Transport>,
        remote: Option<Arc<dyn Transport>>,
    ) -> SdkResult<Self> {
        let pool = Arc::new(WorkerPool::new(config.pool.clone())?);
        let decomposer = Decomposer::with_config(Arc::clone(&registry), config.decomposer.clone());
        let composer = Composer::new(Arc::clone(&registry))
            .with_pool(pool)
            .with_config(config.composer.clone());
        Ok(Self {
            registry,
            decomposer,
            composer,
            local,
            remote,
            config,
        })
    }

    // ---- Accessors ----

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn decomposer(&self) -> &Decomposer {
        &self.decomposer
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn local(&self) -> &Arc<dyn Transport> {
        &self.local
    }

    pub fn remote(&self) -> Option<&Arc<dyn Transport>> {
        self.remote.as_ref()
    }

    pub fn config(&self) -> &GraftConfig {
        &self.config
    }

    // ---- Graph operations ----

    /// Store `root` in the local cache and, if configured, on the remote.
    pub fn send(&self, root: &Node) -> SdkResult<DecomposeOutcome> {
        let mut targets = vec![Arc::clone(&self.local)];
        targets.extend(self.remote.iter().cloned());
        ops::send(&self.decomposer, root, &targets)
    }

    /// Store `root` in the local cache only.
    pub fn save(&self, root: &Node) -> SdkResult<DecomposeOutcome> {
        ops::send(&self.decomposer, root, std::slice::from_ref(&self.local))
    }

    /// Load a graph, pulling whatever the local cache lacks from the remote.
    pub fn receive(&self, root: &ContentHash) -> SdkResult<Node> {
        ops::receive(&self.composer, root, self.remote.as_ref(), &self.local)
    }

    /// Compose from the local cache in the background. Nothing is copied
    /// from the remote.
    pub fn receive_local_async(&self, root: &ContentHash) -> SdkResult<ComposeHandle> {
        Ok(self.composer.compose_async(root, Arc::clone(&self.local))?)
    }

    /// The hash `root` would be stored under.
    pub fn compute_id(&self, root: &Node) -> SdkResult<ContentHash> {
        Ok(self.decomposer.compute_id(root)?)
    }

    /// Cancel every composition running through this client.
    pub fn cancel(&self) {
        self.composer.cancellation_token().cancel();
    }
}

impl std::fmt::Debug for Graft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graft")
            .field("local", &self.local.name())
            .field("remote", &self.remote.as_ref().map(|r| r.name()))
            .field("config", &self.config)
            .finish()
    }
}
