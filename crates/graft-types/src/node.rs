use std::sync::OnceLock;

use crate::chain::TypeChain;
use crate::error::TypeResult;
use crate::hash::ContentHash;
use crate::policy::validate_member_name;
use crate::value::Value;

/// Whether a member slot matched a registered accessor or lives in the open bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Declared,
    Dynamic,
}

/// A named member slot on a [`Node`].
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub value: Value,
    pub slot: SlotKind,
}

impl Member {
    pub fn dynamic(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            slot: SlotKind::Dynamic,
        }
    }

    pub fn declared(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            slot: SlotKind::Declared,
        }
    }
}

/// A dynamically-extensible graph node.
///
/// Members keep insertion order, which is also their order in the canonical
/// fragment. The content hash is computed by the decomposer on demand and
/// cached here together with the layout it was computed under; every
/// mutation drops the cached value.
#[derive(Debug, Clone, Default)]
pub struct Node {
    type_chain: TypeChain,
    members: Vec<Member>,
    id: OnceLock<(u64, ContentHash)>,
}

impl Node {
    pub fn new(type_chain: TypeChain) -> Self {
        Self {
            type_chain,
            members: Vec::new(),
            id: OnceLock::new(),
        }
    }

    /// A node with the `Base` discriminator.
    pub fn untyped() -> Self {
        Self::new(TypeChain::base())
    }

    /// Builder-style [`Node::set`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> TypeResult<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn type_chain(&self) -> &TypeChain {
        &self.type_chain
    }

    pub fn set_type_chain(&mut self, chain: TypeChain) {
        self.invalidate();
        self.type_chain = chain;
    }

    /// Set a member, validating the name. An existing member keeps its
    /// position and slot kind; a new one is appended as dynamic.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> TypeResult<()> {
        validate_member_name(name)?;
        self.upsert(name, value.into(), SlotKind::Dynamic);
        Ok(())
    }

    /// Set a member that matched a registered accessor.
    pub fn set_declared(&mut self, name: &str, value: impl Into<Value>) -> TypeResult<()> {
        validate_member_name(name)?;
        self.upsert(name, value.into(), SlotKind::Declared);
        if let Some(m) = self.members.iter_mut().find(|m| m.name == name) {
            m.slot = SlotKind::Declared;
        }
        Ok(())
    }

    /// Append a member without name validation.
    ///
    /// Used when rebuilding nodes from stored fragments, whose names were
    /// accepted by whichever producer wrote them.
    pub fn insert_unchecked(&mut self, member: Member) {
        self.invalidate();
        match self.members.iter_mut().find(|m| m.name == member.name) {
            Some(existing) => *existing = member,
            None => self.members.push(member),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.member(name).map(|m| &m.value)
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.members.iter().position(|m| m.name == name)?;
        self.invalidate();
        Some(self.members.remove(idx).value)
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Mutable access to one member's value.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.invalidate();
        self.members
            .iter_mut()
            .find(|m| m.name == name)
            .map(|m| &mut m.value)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The content hash computed under `layout`, if there is one since the
    /// last mutation.
    ///
    /// `layout` identifies the encoding choices that shape the canonical
    /// form (for example the default chunk size). A hash cached under a
    /// different layout is not returned.
    pub fn cached_id(&self, layout: u64) -> Option<ContentHash> {
        self.id
            .get()
            .filter(|(cached, _)| *cached == layout)
            .map(|(_, id)| *id)
    }

    /// Record the hash computed under `layout` and return the hash that holds
    /// for that layout. Only the first layout is cached.
    pub fn cache_id(&self, layout: u64, id: ContentHash) -> ContentHash {
        match self.id.get_or_init(|| (layout, id)) {
            (cached, existing) if *cached == layout => *existing,
            _ => id,
        }
    }

    fn upsert(&mut self, name: &str, value: Value, slot: SlotKind) {
        self.invalidate();
        match self.members.iter_mut().find(|m| m.name == name) {
            Some(existing) => existing.value = value,
            None => self.members.push(Member {
                name: name.to_string(),
                value,
                slot,
            }),
        }
    }

    fn invalidate(&mut self) {
        self.id.take();
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.type_chain == other.type_chain && self.members == other.members
    }
}
