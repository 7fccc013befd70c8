/// Why a pooled task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task's cancellation token fired before it ran.
    #[error("task cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),

    /// Another consumer already took the result.
    #[error("task result already taken")]
    Consumed,
}
