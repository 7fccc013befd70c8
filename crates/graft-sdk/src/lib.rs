//! High-level SDK for Graft.
//!
//! Ties the codec, transports and worker pool together:
//!
//! - [`send`] / [`receive`] — free functions over any transports
//! - [`Graft`] — a configured client with a local cache and optional remote
//! - [`GraftConfig`] — TOML configuration for all of the above

pub mod config;
pub mod error;
pub mod graft;
pub mod ops;

pub use config::GraftConfig;
pub use error::{SdkError, SdkResult};
pub use graft::Graft;
pub use ops::{receive, send};

// Re-export key types
pub use graft_codec::{
    ComposeError, ComposeHandle, Composer, ComposerConfig, DecomposeOutcome, Decomposer,
    DecomposerConfig, FormatVersion,
};
pub use graft_registry::{MemberAccessor, PostDecodeHook, TypeDescriptor, TypeRegistry};
pub use graft_transport::{
    MemoryTransport, RemoteConfig, RemoteTransport, SqliteConfig, SqliteTransport, Transport,
};
pub use graft_types::{ContentHash, Member, Node, TypeChain, Value};
