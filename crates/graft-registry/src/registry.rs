use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use graft_types::validate_member_name;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::descriptor::{MemberAccessor, MemberTable, PostDecodeHook, TypeDescriptor, TypeProvider};
use crate::error::{RegistryError, RegistryResult};
use crate::strategy::{MemberNameStrategy, NameStrategy};

/// Outcome of resolving a discriminator.
#[derive(Debug, Clone)]
pub enum Resolution {
    Typed {
        descriptor: Arc<TypeDescriptor>,
        /// The discriminator segment that matched.
        segment: String,
        strategy: NameStrategy,
    },
    /// No segment is registered; the node is kept as an open bag.
    Untyped,
}

impl Resolution {
    pub fn is_typed(&self) -> bool {
        matches!(self, Self::Typed { .. })
    }

    pub fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        match self {
            Self::Typed { descriptor, .. } => Some(descriptor),
            Self::Untyped => None,
        }
    }
}

/// Registry of constructible types, keyed by full type name.
///
/// Lookups by discriminator are cached in three independent snapshot caches
/// (resolutions, member tables, hooks). Registering a type flushes all three.
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<TypeDescriptor>>>,
    name_strategies: Vec<NameStrategy>,
    member_strategies: Vec<MemberNameStrategy>,
    resolved: SnapshotCache<Resolution>,
    members: SnapshotCache<Arc<MemberTable>>,
    hooks: SnapshotCache<Arc<[PostDecodeHook]>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::with_strategies(
            NameStrategy::DEFAULT.to_vec(),
            MemberNameStrategy::DEFAULT.to_vec(),
        )
    }

    pub fn with_strategies(
        name_strategies: Vec<NameStrategy>,
        member_strategies: Vec<MemberNameStrategy>,
    ) -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            name_strategies,
            member_strategies,
            resolved: SnapshotCache::new(),
            members: SnapshotCache::new(),
            hooks: SnapshotCache::new(),
        }
    }

    /// Register a type. Fails if the name is taken or a member name is invalid.
    pub fn register(&self, descriptor: TypeDescriptor) -> RegistryResult<()> {
        for accessor in descriptor.members() {
            validate_member_name(accessor.name()).map_err(|source| {
                RegistryError::InvalidMember {
                    type_name: descriptor.name().to_string(),
                    source,
                }
            })?;
        }
        {
            let mut types = self.types.write().expect("lock poisoned");
            if types.contains_key(descriptor.name()) {
                return Err(RegistryError::DuplicateType(descriptor.name().to_string()));
            }
            debug!(
                type_name = descriptor.name(),
                members = descriptor.members().len(),
                "registered type"
            );
            types.insert(descriptor.name().to_string(), Arc::new(descriptor));
        }
        self.flush_cache();
        Ok(())
    }

    /// Register every type from a provider. Returns how many were added.
    pub fn load(&self, provider: &dyn TypeProvider) -> RegistryResult<usize> {
        let types = provider.types();
        let count = types.len();
        for descriptor in types {
            self.register(descriptor)?;
        }
        info!(provider = provider.name(), count, "loaded type provider");
        Ok(count)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().expect("lock poisoned").contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .types
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Resolve a discriminator to its most-derived registered type.
    pub fn resolve(&self, discriminator: &str) -> Resolution {
        self.resolved.get_or_insert_with(discriminator, || {
            for segment in segments(discriminator) {
                if let Some(found) = self.resolve_segment(segment) {
                    return found;
                }
            }
            warn!(discriminator, "no registered type, using untyped bag");
            Resolution::Untyped
        })
    }

    /// Member accessors for a discriminator, merged across every registered
    /// segment. A derived declaration overrides a base one of the same name.
    pub fn members(&self, discriminator: &str) -> Arc<MemberTable> {
        self.members.get_or_insert_with(discriminator, || {
            let mut accessors: Vec<MemberAccessor> = Vec::new();
            for descriptor in self.descriptors_in_chain(discriminator) {
                for accessor in descriptor.members() {
                    if !accessors.iter().any(|a| a.name() == accessor.name()) {
                        accessors.push(accessor.clone());
                    }
                }
            }
            Arc::new(MemberTable::new(accessors, self.member_strategies.clone()))
        })
    }

    /// Post-decode hooks for a discriminator: base types first, each type's
    /// hooks in the order they were added.
    pub fn hooks(&self, discriminator: &str) -> Arc<[PostDecodeHook]> {
        self.hooks.get_or_insert_with(discriminator, || {
            self.descriptors_in_chain(discriminator)
                .iter()
                .rev()
                .flat_map(|d| d.hooks().iter().cloned())
                .collect()
        })
    }

    /// Drop every cached resolution, member table, and hook list.
    pub fn flush_cache(&self) {
        self.resolved.flush();
        self.members.flush();
        self.hooks.flush();
    }

    /// Number of cached (resolutions, member tables, hook lists).
    pub fn cache_sizes(&self) -> (usize, usize, usize) {
        (self.resolved.len(), self.members.len(), self.hooks.len())
    }

    fn resolve_segment(&self, segment: &str) -> Option<Resolution> {
        let types = self.types.read().expect("lock poisoned");
        self.name_strategies.iter().find_map(|strategy| {
            types.get(&strategy.candidate(segment)).map(|d| Resolution::Typed {
                descriptor: Arc::clone(d),
                segment: segment.to_string(),
                strategy: *strategy,
            })
        })
    }

    /// Distinct registered descriptors along the chain, most-derived first.
    fn descriptors_in_chain(&self, discriminator: &str) -> Vec<Arc<TypeDescriptor>> {
        let mut found: Vec<Arc<TypeDescriptor>> = Vec::new();
        for segment in segments(discriminator) {
            if let Some(Resolution::Typed { descriptor, .. }) = self.resolve_segment(segment) {
                if !found.iter().any(|d| d.name() == descriptor.name()) {
                    found.push(descriptor);
                }
            }
        }
        found
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("type_count", &self.len())
            .field("name_strategies", &self.name_strategies)
            .finish()
    }
}

fn segments(discriminator: &str) -> impl Iterator<Item = &str> {
    discriminator.split(':').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_types::{DetachPolicy, Node, ValueKind};
    use std::sync::Mutex;

    fn wall() -> TypeDescriptor {
        TypeDescriptor::new("Objects.Wall")
            .member(MemberAccessor::new("height", ValueKind::Float))
            .member(MemberAccessor::detached("baseLine", ValueKind::Node))
    }

    fn element() -> TypeDescriptor {
        TypeDescriptor::new("Objects.Element")
            .member(MemberAccessor::new("height", ValueKind::Int))
            .member(MemberAccessor::new("units", ValueKind::String))
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    #[test]
    fn resolves_exact_name() {
        let registry = TypeRegistry::new();
        registry.register(wall()).unwrap();
        let res = registry.resolve("Objects.Wall");
        assert_eq!(res.descriptor().unwrap().name(), "Objects.Wall");
    }

    #[test]
    fn walks_chain_most_derived_first() {
        let registry = TypeRegistry::new();
        registry.register(element()).unwrap();
        let res = registry.resolve("Custom.FancyWall:Objects.Element");
        match res {
            Resolution::Typed { descriptor, segment, strategy } => {
                assert_eq!(descriptor.name(), "Objects.Element");
                assert_eq!(segment, "Objects.Element");
                assert_eq!(strategy, NameStrategy::Exact);
            }
            Resolution::Untyped => panic!("expected typed"),
        }
    }

    #[test]
    fn falls_back_to_deprecated_namespace() {
        let registry = TypeRegistry::new();
        registry.register(TypeDescriptor::new("Objects.Deprecated.Beam")).unwrap();
        match registry.resolve("Objects.Beam") {
            Resolution::Typed { strategy, .. } => {
                assert_eq!(strategy, NameStrategy::DeprecatedNamespace)
            }
            Resolution::Untyped => panic!("expected typed"),
        }
    }

    #[test]
    fn unknown_is_untyped() {
        let registry = TypeRegistry::new();
        assert!(!registry.resolve("Nobody.Knows:Me").is_typed());
        assert!(registry.members("Nobody.Knows").is_empty());
        assert!(registry.hooks("Nobody.Knows").is_empty());
    }

    #[test]
    fn strategies_are_configurable() {
        let registry = TypeRegistry::with_strategies(
            vec![NameStrategy::Exact],
            vec![MemberNameStrategy::Exact],
        );
        registry.register(TypeDescriptor::new("Objects.Deprecated.Beam")).unwrap();
        assert!(!registry.resolve("Objects.Beam").is_typed());
    }

    // -----------------------------------------------------------------------
    // Members and hooks
    // -----------------------------------------------------------------------

    #[test]
    fn members_merge_across_chain() {
        let registry = TypeRegistry::new();
        registry.register(wall()).unwrap();
        registry.register(element()).unwrap();
        let table = registry.members("Objects.Wall:Objects.Element");
        assert_eq!(table.len(), 3);
        // derived declaration wins
        assert_eq!(table.find("height").unwrap().kind(), ValueKind::Float);
        assert_eq!(table.find("UNITS").unwrap().name(), "units");
        assert_eq!(table.policy_of("baseLine"), Some(DetachPolicy::Detach));
    }

    #[test]
    fn hooks_run_base_first_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = |tag: &'static str| {
            let log = Arc::clone(&log);
            PostDecodeHook::new(tag, move |_node: &mut Node| {
                log.lock().unwrap().push(tag);
                Ok(())
            })
        };
        let registry = TypeRegistry::new();
        registry
            .register(
                TypeDescriptor::new("Derived")
                    .hook(hook("derived-1"))
                    .hook(hook("derived-2")),
            )
            .unwrap();
        registry.register(TypeDescriptor::new("Root").hook(hook("root"))).unwrap();

        let mut node = Node::untyped();
        for h in registry.hooks("Derived:Root").iter() {
            h.run(&mut node).unwrap();
        }
        assert_eq!(*log.lock().unwrap(), ["root", "derived-1", "derived-2"]);
    }

    // -----------------------------------------------------------------------
    // Registration and caching
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_registration_fails() {
        let registry = TypeRegistry::new();
        registry.register(wall()).unwrap();
        assert!(matches!(
            registry.register(wall()),
            Err(RegistryError::DuplicateType(name)) if name == "Objects.Wall"
        ));
    }

    #[test]
    fn invalid_member_name_is_rejected() {
        let registry = TypeRegistry::new();
        let bad = TypeDescriptor::new("Bad").member(MemberAccessor::new("a.b", ValueKind::Int));
        assert!(matches!(
            registry.register(bad),
            Err(RegistryError::InvalidMember { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn register_flushes_stale_resolutions() {
        let registry = TypeRegistry::new();
        assert!(!registry.resolve("Objects.Wall").is_typed());
        registry.register(wall()).unwrap();
        assert!(registry.resolve("Objects.Wall").is_typed());
    }

    #[test]
    fn lookups_are_cached_until_flushed() {
        let registry = TypeRegistry::new();
        registry.register(wall()).unwrap();
        registry.resolve("Objects.Wall");
        registry.members("Objects.Wall");
        registry.hooks("Objects.Wall");
        assert_eq!(registry.cache_sizes(), (1, 1, 1));
        registry.flush_cache();
        assert_eq!(registry.cache_sizes(), (0, 0, 0));
    }

    struct Kit;

    impl TypeProvider for Kit {
        fn name(&self) -> &str {
            "test-kit"
        }

        fn types(&self) -> Vec<TypeDescriptor> {
            vec![wall(), element()]
        }
    }

    #[test]
    fn load_provider() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.load(&Kit).unwrap(), 2);
        assert_eq!(registry.type_names(), ["Objects.Element", "Objects.Wall"]);
        assert!(registry.contains("Objects.Wall"));
    }
}
