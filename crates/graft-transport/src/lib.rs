//! Fragment transports for Graft.
//!
//! A [`Transport`] is a store keyed by [`ContentHash`](graft_types::ContentHash).
//! Writes are idempotent and may be buffered until [`Transport::flush`];
//! reads distinguish "not found" (`Ok(None)`) from "store unreachable"
//! ([`TransportError::Unavailable`]).
//!
//! # Implementations
//!
//! - [`MemoryTransport`] — concurrent in-process map
//! - [`SqliteTransport`] — one SQLite file per scope, batched commits
//! - [`RemoteTransport`] — HTTP object service with batched upload and
//!   windowed, resumable download
//! - [`TieredTransport`] — in-memory L1 in front of any transport
//! - [`FanOutTransport`] — writes to several transports at once

pub mod error;
pub mod fanout;
pub mod memory;
pub mod remote;
pub mod sqlite;
pub mod tiered;
pub mod traits;
pub mod wire;

pub use error::{TransportError, TransportResult};
pub use fanout::FanOutTransport;
pub use memory::MemoryTransport;
pub use remote::{RemoteConfig, RemoteTransport};
pub use sqlite::{SqliteConfig, SqliteTransport};
pub use tiered::TieredTransport;
pub use traits::Transport;
