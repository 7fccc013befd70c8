use graft_types::{TypeError, ValueKind};

/// Errors from registering types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("type already registered: {0}")]
    DuplicateType(String),

    #[error("type {type_name} declares an invalid member: {source}")]
    InvalidMember {
        type_name: String,
        #[source]
        source: TypeError,
    },
}

/// A decoded value does not fit the member it is assigned to.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("member {member}: expected {expected}, found {found}")]
pub struct AccessorError {
    pub member: String,
    pub expected: ValueKind,
    pub found: ValueKind,
}

/// A post-decode hook rejected a node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("hook {hook} failed: {reason}")]
pub struct HookError {
    pub hook: String,
    pub reason: String,
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
