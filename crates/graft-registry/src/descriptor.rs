use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use graft_types::{DetachPolicy, Node, Value, ValueKind};

use crate::error::{AccessorError, HookError};
use crate::strategy::MemberNameStrategy;

/// A settable member declared by a registered type.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberAccessor {
    name: String,
    kind: ValueKind,
    policy: DetachPolicy,
}

impl MemberAccessor {
    /// An inline member of the given kind.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            policy: DetachPolicy::Inline,
        }
    }

    pub fn detached(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::new(name, kind).with_policy(DetachPolicy::Detach)
    }

    pub fn chunked(name: impl Into<String>, chunk_size: Option<usize>) -> Self {
        Self::new(name, ValueKind::List).with_policy(DetachPolicy::Chunked { chunk_size })
    }

    pub fn with_policy(mut self, policy: DetachPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn policy(&self) -> DetachPolicy {
        self.policy
    }

    /// Convert a decoded value to this member's kind.
    ///
    /// Null is always accepted. Ints widen to floats, and integral floats
    /// narrow to ints; anything else must already be the declared kind.
    pub fn accept(&self, value: Value) -> Result<Value, AccessorError> {
        match (self.kind, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ValueKind::Any, v) => Ok(v),
            (ValueKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (ValueKind::Int, Value::Float(f))
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                Ok(Value::Int(f as i64))
            }
            (kind, v) if v.kind() == kind => Ok(v),
            (kind, v) => Err(AccessorError {
                member: self.name.clone(),
                expected: kind,
                found: v.kind(),
            }),
        }
    }
}

/// The member accessors of a resolved discriminator, including the members
/// inherited from every registered base segment.
#[derive(Debug, Clone, Default)]
pub struct MemberTable {
    accessors: Vec<MemberAccessor>,
    strategies: Vec<MemberNameStrategy>,
}

impl MemberTable {
    pub fn new(accessors: Vec<MemberAccessor>, strategies: Vec<MemberNameStrategy>) -> Self {
        Self {
            accessors,
            strategies,
        }
    }

    /// Find the accessor for a stored member name, trying each strategy in
    /// turn across the whole table.
    pub fn find(&self, stored: &str) -> Option<&MemberAccessor> {
        self.strategies.iter().find_map(|strategy| {
            self.accessors
                .iter()
                .find(|a| strategy.matches(&a.name, stored))
        })
    }

    /// Declared detachment policy of a member, if the member is declared.
    pub fn policy_of(&self, name: &str) -> Option<DetachPolicy> {
        self.find(name).map(MemberAccessor::policy)
    }

    pub fn accessors(&self) -> &[MemberAccessor] {
        &self.accessors
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}

type HookFn = dyn Fn(&mut Node) -> Result<(), String> + Send + Sync;

/// Callback run on a node after all of its members have been assigned.
#[derive(Clone)]
pub struct PostDecodeHook {
    name: String,
    f: Arc<HookFn>,
}

impl PostDecodeHook {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Node) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the hook. A panicking hook is reported as a failure.
    pub fn run(&self, node: &mut Node) -> Result<(), HookError> {
        match catch_unwind(AssertUnwindSafe(|| (self.f)(node))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(HookError {
                hook: self.name.clone(),
                reason,
            }),
            Err(_) => Err(HookError {
                hook: self.name.clone(),
                reason: "hook panicked".into(),
            }),
        }
    }
}

impl fmt::Debug for PostDecodeHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostDecodeHook").field("name", &self.name).finish()
    }
}

/// A constructible type known to the registry.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    members: Vec<MemberAccessor>,
    hooks: Vec<PostDecodeHook>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn member(mut self, accessor: MemberAccessor) -> Self {
        self.members.retain(|m| m.name != accessor.name);
        self.members.push(accessor);
        self
    }

    /// Append a hook; hooks run in the order they were added.
    pub fn hook(mut self, hook: PostDecodeHook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[MemberAccessor] {
        &self.members
    }

    pub fn hooks(&self) -> &[PostDecodeHook] {
        &self.hooks
    }
}

/// A bundle of types loaded into a registry together.
pub trait TypeProvider: Send + Sync {
    fn name(&self) -> &str;
    fn types(&self) -> Vec<TypeDescriptor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_exact_kind() {
        let acc = MemberAccessor::new("label", ValueKind::String);
        assert_eq!(acc.accept(Value::from("x")), Ok(Value::from("x")));
    }

    #[test]
    fn accept_null_for_any_kind() {
        let acc = MemberAccessor::new("width", ValueKind::Float);
        assert_eq!(acc.accept(Value::Null), Ok(Value::Null));
    }

    #[test]
    fn int_widens_to_float() {
        let acc = MemberAccessor::new("width", ValueKind::Float);
        assert_eq!(acc.accept(Value::Int(3)), Ok(Value::Float(3.0)));
    }

    #[test]
    fn integral_float_narrows_to_int() {
        let acc = MemberAccessor::new("count", ValueKind::Int);
        assert_eq!(acc.accept(Value::Float(4.0)), Ok(Value::Int(4)));
        assert!(acc.accept(Value::Float(4.5)).is_err());
    }

    #[test]
    fn mismatch_reports_kinds() {
        let acc = MemberAccessor::new("count", ValueKind::Int);
        let err = acc.accept(Value::from("four")).unwrap_err();
        assert_eq!(err.member, "count");
        assert_eq!(err.expected, ValueKind::Int);
        assert_eq!(err.found, ValueKind::String);
    }

    #[test]
    fn table_prefers_exact_match() {
        let table = MemberTable::new(
            vec![
                MemberAccessor::new("Width", ValueKind::Float),
                MemberAccessor::new("width", ValueKind::Int),
            ],
            MemberNameStrategy::DEFAULT.to_vec(),
        );
        assert_eq!(table.find("width").unwrap().kind(), ValueKind::Int);
        assert_eq!(table.find("WIDTH").unwrap().name(), "Width");
        assert!(table.find("height").is_none());
    }

    #[test]
    fn table_reports_declared_policy() {
        let table = MemberTable::new(
            vec![MemberAccessor::chunked("points", Some(10))],
            MemberNameStrategy::DEFAULT.to_vec(),
        );
        assert_eq!(
            table.policy_of("points"),
            Some(DetachPolicy::Chunked {
                chunk_size: Some(10)
            })
        );
        assert_eq!(table.policy_of("other"), None);
    }

    #[test]
    fn hook_failure_is_reported() {
        let hook = PostDecodeHook::new("reject", |_| Err("nope".to_string()));
        let mut node = Node::untyped();
        let err = hook.run(&mut node).unwrap_err();
        assert_eq!(err.hook, "reject");
        assert_eq!(err.reason, "nope");
    }

    #[test]
    fn hook_panic_is_reported() {
        let hook = PostDecodeHook::new("boom", |_| panic!("boom"));
        let mut node = Node::untyped();
        assert_eq!(hook.run(&mut node).unwrap_err().reason, "hook panicked");
    }

    #[test]
    fn descriptor_member_redeclaration_replaces() {
        let desc = TypeDescriptor::new("T")
            .member(MemberAccessor::new("a", ValueKind::Int))
            .member(MemberAccessor::new("a", ValueKind::Float));
        assert_eq!(desc.members().len(), 1);
        assert_eq!(desc.members()[0].kind(), ValueKind::Float);
    }
}
