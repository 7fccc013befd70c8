use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Member names owned by the fragment envelope.
pub const RESERVED_MEMBERS: [&str; 2] = ["_type", "id"];

/// How a member's value is laid out when a node is decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum DetachPolicy {
    /// Serialized inside the parent fragment.
    #[default]
    Inline,
    /// Every node in the value becomes its own fragment.
    Detach,
    /// A list is split into chunk fragments of at most `chunk_size` items.
    /// `None` means the decomposer's configured default.
    Chunked { chunk_size: Option<usize> },
}

impl DetachPolicy {
    /// Infer the policy from the member naming convention.
    ///
    /// `@name` detaches, `@(N)name` chunks with size `N` (empty or zero `N`
    /// selects the default), anything else is inline.
    pub fn from_member_name(name: &str) -> Self {
        let Some(rest) = name.strip_prefix('@') else {
            return Self::Inline;
        };
        if let Some(spec) = rest.strip_prefix('(') {
            if let Some(close) = spec.find(')') {
                let size = spec[..close].trim();
                if size.is_empty() {
                    return Self::Chunked { chunk_size: None };
                }
                if let Ok(n) = size.parse::<usize>() {
                    let chunk_size = if n == 0 { None } else { Some(n) };
                    return Self::Chunked { chunk_size };
                }
            }
        }
        Self::Detach
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline)
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked { .. })
    }

    /// Policy applied to the elements of a container held under this policy.
    ///
    /// Chunk contents are written inline; the chunk itself is the stored unit.
    pub fn for_elements(&self) -> Self {
        match self {
            Self::Chunked { .. } => Self::Inline,
            other => *other,
        }
    }
}

/// Names beginning with `__` are transient: never hashed, never stored.
pub fn is_transient(name: &str) -> bool {
    name.starts_with("__")
}

/// Check that `name` may be used as a dynamic member name.
pub fn validate_member_name(name: &str) -> TypeResult<()> {
    let invalid = |reason| {
        Err(TypeError::InvalidMemberName {
            name: name.to_string(),
            reason,
        })
    };
    if name.is_empty() {
        return invalid("name is empty");
    }
    if name == "@" {
        return invalid("detach prefix without a name");
    }
    if name.starts_with("@@") {
        return invalid("name starts with more than one '@'");
    }
    if name.contains('.') || name.contains('/') {
        return invalid("name contains '.' or '/'");
    }
    if RESERVED_MEMBERS.contains(&name) {
        return Err(TypeError::ReservedMemberName(name.to_string()));
    }
    Ok(())
}
