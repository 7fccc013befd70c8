use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use graft_crypto::ContentHasher;
use graft_registry::TypeRegistry;
use graft_transport::Transport;
use graft_types::{is_transient, ContentHash, DetachPolicy, Node, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};
use tracing::{debug, info, trace};

use crate::error::{DecomposeError, DecomposeResult};
use crate::fragment::{self, ClosureEntry, ClosureTable, ID_KEY, TYPE_KEY};

/// Configuration for [`Decomposer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecomposerConfig {
    /// Items per chunk when a chunked member does not name a size.
    pub default_chunk_size: usize,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: 1000,
        }
    }
}

/// Summary of a finished decomposition.
#[derive(Debug, Clone)]
pub struct DecomposeOutcome {
    pub root: ContentHash,
    /// Fragments handed to the transport, root included. A fragment reached
    /// through several parents counts once.
    pub fragments_written: usize,
    pub bytes_written: usize,
    pub closure: ClosureTable,
}

/// Walks a node graph and writes it to a transport as content-addressed
/// fragments.
///
/// Members are encoded in insertion order. A member's layout comes from the
/// accessor registered for it, or failing that from its name (`@name`,
/// `@(N)name`). Members whose names begin with `__` are skipped.
pub struct Decomposer {
    registry: Arc<TypeRegistry>,
    config: DecomposerConfig,
}

impl Decomposer {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(registry, DecomposerConfig::default())
    }

    pub fn with_config(registry: Arc<TypeRegistry>, config: DecomposerConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &DecomposerConfig {
        &self.config
    }

    /// Key under which this decomposer's hashes are cached on nodes. Nodes
    /// hashed with a different chunk size are hashed again.
    fn layout(&self) -> u64 {
        self.config.default_chunk_size.max(1) as u64
    }

    /// Store `root` and every detached descendant, then flush the transport.
    ///
    /// Children are written before their parents and the root is written
    /// last, carrying the closure of everything below it.
    pub fn decompose(
        &self,
        root: &Node,
        transport: &dyn Transport,
    ) -> DecomposeResult<DecomposeOutcome> {
        let started = Instant::now();
        let mut walk = Walk::new(self, Sink::Store(transport));

        walk.frames.push(Vec::new());
        let body = walk.encode_node(root)?;
        let children = walk.frames.pop().unwrap_or_default();
        let hash = ContentHasher::FRAGMENT.hash_fragment(&body)?;
        let closure = walk.closure(&hash, &children);

        let bytes = fragment::stored_bytes(&body, &hash, Some(&closure))?;
        transport
            .put(&hash, &bytes)
            .map_err(|source| DecomposeError::Put { hash, source })?;
        walk.fragments += 1;
        walk.bytes += bytes.len();

        transport.flush().map_err(|source| DecomposeError::Flush {
            transport: transport.name().to_string(),
            source,
        })?;
        root.cache_id(self.layout(), hash);

        info!(
            root = %hash.short_hex(),
            transport = transport.name(),
            fragments = walk.fragments,
            descendants = closure.len(),
            bytes = walk.bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "decomposed graph"
        );
        Ok(DecomposeOutcome {
            root: hash,
            fragments_written: walk.fragments,
            bytes_written: walk.bytes,
            closure,
        })
    }

    /// The content hash `root` would be stored under, without writing
    /// anything. The result is cached on the node.
    pub fn compute_id(&self, root: &Node) -> DecomposeResult<ContentHash> {
        if let Some(id) = root.cached_id(self.layout()) {
            return Ok(id);
        }
        let mut walk = Walk::new(self, Sink::HashOnly);
        let body = walk.encode_node(root)?;
        let hash = ContentHasher::FRAGMENT.hash_fragment(&body)?;
        Ok(root.cache_id(self.layout(), hash))
    }

    /// The whole graph as one JSON document with every node inline.
    pub fn to_json(&self, root: &Node) -> DecomposeResult<JsonValue> {
        let mut walk = Walk::new(self, Sink::Inline);
        walk.encode_node(root).map(JsonValue::Object)
    }
}

impl std::fmt::Debug for Decomposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decomposer")
            .field("config", &self.config)
            .field("types", &self.registry.len())
            .finish()
    }
}

enum Sink<'a> {
    Store(&'a dyn Transport),
    HashOnly,
    Inline,
}

/// State of one traversal.
///
/// `frames` holds, for every detached fragment currently being encoded, the
/// hashes of the detached fragments it references directly. `edges` keeps
/// that list for every fragment already hashed; it doubles as the set of
/// fragments written by this walk.
struct Walk<'a> {
    registry: &'a TypeRegistry,
    default_chunk_size: usize,
    layout: u64,
    sink: Sink<'a>,
    edges: HashMap<ContentHash, Vec<ContentHash>>,
    frames: Vec<Vec<ContentHash>>,
    fragments: usize,
    bytes: usize,
}

impl<'a> Walk<'a> {
    fn new(decomposer: &'a Decomposer, sink: Sink<'a>) -> Self {
        Self {
            registry: &decomposer.registry,
            default_chunk_size: decomposer.config.default_chunk_size.max(1),
            layout: decomposer.layout(),
            sink,
            edges: HashMap::new(),
            frames: Vec::new(),
            fragments: 0,
            bytes: 0,
        }
    }

    fn encode_node(&mut self, node: &Node) -> DecomposeResult<Map<String, JsonValue>> {
        let discriminator = node.type_chain().as_discriminator();
        let table = self.registry.members(&discriminator);

        let mut body = Map::new();
        body.insert(TYPE_KEY.into(), JsonValue::String(discriminator));
        for member in node.members() {
            let name = member.name.as_str();
            if is_transient(name) {
                continue;
            }
            if name == TYPE_KEY || name == ID_KEY {
                return Err(DecomposeError::invalid("reserved member name").within(name));
            }
            let policy = table
                .policy_of(name)
                .unwrap_or_else(|| DetachPolicy::from_member_name(name));
            let value = self
                .encode_value(&member.value, policy)
                .map_err(|e| e.within(name))?;
            body.insert(name.to_string(), value);
        }
        Ok(body)
    }

    fn encode_value(&mut self, value: &Value, policy: DetachPolicy) -> DecomposeResult<JsonValue> {
        let policy = match self.sink {
            Sink::Inline => DetachPolicy::Inline,
            _ => policy,
        };
        let encoded = match value {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| DecomposeError::invalid(format!("non-finite float {f}")))?,
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Node(node) if policy.is_inline() => JsonValue::Object(self.encode_node(node)?),
            Value::Node(node) => fragment::reference(&self.detach_node(node)?),
            Value::List(items) => match policy {
                DetachPolicy::Chunked { chunk_size } => {
                    let size = chunk_size.unwrap_or(self.default_chunk_size).max(1);
                    self.encode_chunks(items, size)?
                }
                _ => {
                    let element_policy = policy.for_elements();
                    let mut out = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        let encoded = self
                            .encode_value(item, element_policy)
                            .map_err(|e| e.within(&format!("[{i}]")))?;
                        out.push(encoded);
                    }
                    JsonValue::Array(out)
                }
            },
            Value::Map(entries) => {
                let element_policy = policy.for_elements();
                let mut out = Map::new();
                for (key, item) in entries {
                    if key == TYPE_KEY {
                        return Err(DecomposeError::invalid("map key is reserved for nodes")
                            .within(key));
                    }
                    let encoded = self
                        .encode_value(item, element_policy)
                        .map_err(|e| e.within(key))?;
                    out.insert(key.clone(), encoded);
                }
                JsonValue::Object(out)
            }
        };
        Ok(encoded)
    }

    fn detach_node(&mut self, node: &Node) -> DecomposeResult<ContentHash> {
        if let Some(id) = node.cached_id(self.layout) {
            let known = match self.sink {
                Sink::HashOnly => true,
                _ => self.edges.contains_key(&id),
            };
            if known {
                self.link(id);
                return Ok(id);
            }
        }
        self.frames.push(Vec::new());
        let body = self.encode_node(node);
        let children = self.frames.pop().unwrap_or_default();
        let hash = self.emit(body?, children)?;
        Ok(node.cache_id(self.layout, hash))
    }

    fn encode_chunks(&mut self, items: &[Value], size: usize) -> DecomposeResult<JsonValue> {
        let mut references = Vec::with_capacity(items.len().div_ceil(size));
        for (window_index, window) in items.chunks(size).enumerate() {
            self.frames.push(Vec::new());
            let mut data = Vec::with_capacity(window.len());
            let mut failed = None;
            for (i, item) in window.iter().enumerate() {
                match self.encode_value(item, DetachPolicy::Inline) {
                    Ok(encoded) => data.push(encoded),
                    Err(e) => {
                        failed = Some(e.within(&format!("[{}]", window_index * size + i)));
                        break;
                    }
                }
            }
            let children = self.frames.pop().unwrap_or_default();
            if let Some(e) = failed {
                return Err(e);
            }
            let hash = self.emit(fragment::chunk(data), children)?;
            references.push(fragment::reference(&hash));
        }
        debug!(items = items.len(), chunks = references.len(), size, "chunked list");
        Ok(JsonValue::Array(references))
    }

    /// Hash a detached body, record it under the enclosing fragment, and
    /// write it unless this walk already has.
    fn emit(
        &mut self,
        body: Map<String, JsonValue>,
        children: Vec<ContentHash>,
    ) -> DecomposeResult<ContentHash> {
        let hash = ContentHasher::FRAGMENT.hash_fragment(&body)?;
        self.link(hash);
        if self.edges.contains_key(&hash) {
            return Ok(hash);
        }
        self.edges.insert(hash, children);
        if let Sink::Store(transport) = self.sink {
            let bytes = fragment::stored_bytes(&body, &hash, None)?;
            transport
                .put(&hash, &bytes)
                .map_err(|source| DecomposeError::Put { hash, source })?;
            self.fragments += 1;
            self.bytes += bytes.len();
            trace!(hash = %hash.short_hex(), size = bytes.len(), "stored fragment");
        }
        Ok(hash)
    }

    fn link(&mut self, hash: ContentHash) {
        if let Some(parent) = self.frames.last_mut() {
            parent.push(hash);
        }
    }

    /// Every fragment reachable from the root, each with the ancestor path
    /// of its first encounter in depth-first pre-order.
    fn closure(&self, root: &ContentHash, children: &[ContentHash]) -> ClosureTable {
        let mut table = ClosureTable::new();
        let root_path = root.to_hex();
        let mut stack: Vec<(ContentHash, String)> = children
            .iter()
            .rev()
            .map(|h| (*h, root_path.clone()))
            .collect();
        while let Some((hash, path)) = stack.pop() {
            if table.contains(&hash) {
                continue;
            }
            if let Some(below) = self.edges.get(&hash).filter(|c| !c.is_empty()) {
                let child_path = format!("{path}.{hash}");
                stack.extend(below.iter().rev().map(|h| (*h, child_path.clone())));
            }
            table.insert(hash, ClosureEntry::Path(path));
        }
        table
    }
}
