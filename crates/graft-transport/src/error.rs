use graft_types::ContentHash;

/// Errors from transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The backing store could not be reached. Retrying later may succeed.
    #[error("transport {transport} unavailable: {reason}")]
    Unavailable { transport: String, reason: String },

    /// The remote answered with a status the transport does not handle.
    #[error("unexpected HTTP status {status} from {url}")]
    Http { status: u16, url: String },

    /// Error from the SQLite backend.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed wire payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A single fragment exceeds what the transport may send.
    #[error("fragment {hash} is {size} bytes, limit is {limit}")]
    FragmentTooLarge {
        hash: ContentHash,
        size: usize,
        limit: usize,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TransportError {
    pub fn unavailable(transport: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            transport: transport.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the store was unreachable, as opposed to answering badly.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Http { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

/// Statuses a well-behaved client retries: request timeout, bad gateway,
/// service unavailable, gateway timeout.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 502 | 503 | 504)
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_retryable() {
        let err = TransportError::unavailable("remote", "connection refused");
        assert!(err.is_unavailable());
        assert!(err.is_retryable());
    }

    #[test]
    fn only_transient_statuses_retry() {
        let http = |status| TransportError::Http { status, url: "u".into() };
        assert!(http(503).is_retryable());
        assert!(http(408).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(500).is_unavailable());
    }

    #[test]
    fn protocol_errors_are_permanent() {
        assert!(!TransportError::Protocol("bad".into()).is_retryable());
    }
}
