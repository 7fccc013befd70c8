/// Errors from constructing or validating foundation types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Member names must be non-empty and free of path separators.
    #[error("invalid member name {name:?}: {reason}")]
    InvalidMemberName { name: String, reason: &'static str },

    /// `_type` and `id` belong to the fragment envelope.
    #[error("member name {0:?} is reserved")]
    ReservedMemberName(String),

    #[error("invalid type chain {0:?}")]
    InvalidTypeChain(String),
}

/// Result alias for foundation type operations.
pub type TypeResult<T> = Result<T, TypeError>;
