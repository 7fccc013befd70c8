use std::fmt;

use graft_crypto::HasherError;
use graft_registry::{AccessorError, HookError};
use graft_transport::TransportError;
use graft_types::ContentHash;

/// Errors from decomposing a node graph.
#[derive(Debug, thiserror::Error)]
pub enum DecomposeError {
    /// The graph holds a value that has no fragment encoding.
    #[error("invalid value at {path}: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("failed to store fragment {hash}: {source}")]
    Put {
        hash: ContentHash,
        #[source]
        source: TransportError,
    },

    #[error("flush of {transport} failed: {source}")]
    Flush {
        transport: String,
        #[source]
        source: TransportError,
    },

    #[error("hashing failed: {0}")]
    Hash(#[from] HasherError),
}

impl DecomposeError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: String::new(),
            reason: reason.into(),
        }
    }

    /// Prefix the path of an [`InvalidValue`](Self::InvalidValue) with the
    /// member or index it was found under.
    pub(crate) fn within(self, segment: &str) -> Self {
        match self {
            Self::InvalidValue { path, reason } => {
                let path = if path.is_empty() {
                    segment.to_string()
                } else if path.starts_with('[') {
                    format!("{segment}{path}")
                } else {
                    format!("{segment}.{path}")
                };
                Self::InvalidValue { path, reason }
            }
            other => other,
        }
    }
}

/// Result alias for decomposition.
pub type DecomposeResult<T> = Result<T, DecomposeError>;

/// One fragment that could not be turned back into a value.
#[derive(Debug, thiserror::Error)]
pub enum FragmentError {
    /// The transport could not be reached.
    #[error("fragment {hash} unavailable: {source}")]
    Unavailable {
        hash: ContentHash,
        #[source]
        source: TransportError,
    },

    /// The transport answered but failed for another reason.
    #[error("reading fragment {hash} failed: {source}")]
    Transport {
        hash: ContentHash,
        #[source]
        source: TransportError,
    },

    #[error("fragment {hash} not found")]
    NotFound { hash: ContentHash },

    #[error("malformed fragment {hash} at {path}: {reason}")]
    Malformed {
        hash: ContentHash,
        path: String,
        reason: String,
    },

    #[error("member of fragment {hash} rejected: {source}")]
    Member {
        hash: ContentHash,
        #[source]
        source: AccessorError,
    },

    #[error("{type_name} ({hash}): {source}")]
    Hook {
        type_name: String,
        hash: ContentHash,
        #[source]
        source: HookError,
    },

    #[error("decoding fragment {hash} aborted: {reason}")]
    Internal { hash: ContentHash, reason: String },

    #[error("composition cancelled")]
    Cancelled,
}

impl FragmentError {
    pub(crate) fn from_transport(hash: ContentHash, source: TransportError) -> Self {
        if source.is_unavailable() {
            Self::Unavailable { hash, source }
        } else {
            Self::Transport { hash, source }
        }
    }

    pub(crate) fn malformed(
        hash: ContentHash,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Malformed {
            hash,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// The fragment this failure belongs to. `None` for cancellation.
    pub fn hash(&self) -> Option<ContentHash> {
        match self {
            Self::Unavailable { hash, .. }
            | Self::Transport { hash, .. }
            | Self::NotFound { hash }
            | Self::Malformed { hash, .. }
            | Self::Member { hash, .. }
            | Self::Hook { hash, .. }
            | Self::Internal { hash, .. } => Some(*hash),
            Self::Cancelled => None,
        }
    }

    /// Whether retrying the same composition could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Transport { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// A composition failed. Carries every distinct fragment failure observed.
#[derive(Debug)]
pub struct ComposeError {
    root: ContentHash,
    failures: Vec<FragmentError>,
}

impl ComposeError {
    pub(crate) fn new(root: ContentHash, failures: Vec<FragmentError>) -> Self {
        Self { root, failures }
    }

    pub(crate) fn single(root: ContentHash, failure: FragmentError) -> Self {
        Self::new(root, vec![failure])
    }

    pub fn root(&self) -> ContentHash {
        self.root
    }

    pub fn failures(&self) -> &[FragmentError] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<FragmentError> {
        self.failures
    }

    /// Hashes no transport held.
    pub fn missing(&self) -> Vec<ContentHash> {
        self.failures
            .iter()
            .filter_map(|f| match f {
                FragmentError::NotFound { hash } => Some(*hash),
                _ => None,
            })
            .collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f, FragmentError::Cancelled))
    }

    /// True when every failure is transient.
    pub fn is_retryable(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(FragmentError::is_retryable)
    }
}

impl fmt::Display for ComposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "composing {} failed with {} fragment error(s)",
            self.root,
            self.failures.len()
        )?;
        if let Some(first) = self.failures.first() {
            write!(f, "; first: {first}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ComposeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::from_hash([byte; 32])
    }

    #[test]
    fn invalid_value_paths_nest() {
        let err = DecomposeError::invalid("non-finite float")
            .within("x")
            .within("[3]")
            .within("@(10)points");
        match err {
            DecomposeError::InvalidValue { path, .. } => assert_eq!(path, "@(10)points[3].x"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transport_failures_are_classified() {
        let down = FragmentError::from_transport(hash(1), TransportError::unavailable("t", "down"));
        assert!(matches!(down, FragmentError::Unavailable { .. }));
        assert!(down.is_retryable());

        let broken = FragmentError::from_transport(hash(2), TransportError::Protocol("bad".into()));
        assert!(matches!(broken, FragmentError::Transport { .. }));
        assert!(!broken.is_retryable());
    }

    #[test]
    fn compose_error_reports_missing() {
        let err = ComposeError::new(
            hash(0),
            vec![
                FragmentError::NotFound { hash: hash(1) },
                FragmentError::malformed(hash(2), "x", "bad"),
            ],
        );
        assert_eq!(err.missing(), vec![hash(1)]);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("2 fragment error(s)"));
    }

    #[test]
    fn cancellation_has_no_hash() {
        assert_eq!(FragmentError::Cancelled.hash(), None);
        assert!(ComposeError::single(hash(0), FragmentError::Cancelled).is_cancelled());
    }
}
