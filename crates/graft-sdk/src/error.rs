use graft_codec::{ComposeError, DecomposeError, FragmentError};
use graft_registry::RegistryError;
use graft_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("decompose error: {0}")]
    Decompose(#[from] DecomposeError),

    #[error("{0}")]
    Compose(#[from] ComposeError),

    #[error("fragment error: {0}")]
    Fragment(#[from] FragmentError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

pub type SdkResult<T> = Result<T, SdkError>;
