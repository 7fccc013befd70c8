//! HTTP object server for Graft.
//!
//! Stores fragments per namespace, in memory or in one SQLite file per
//! namespace, and speaks the wire protocol of
//! [`RemoteTransport`](graft_transport::RemoteTransport): line-delimited
//! batch upload, presence diff, bulk download, and ranged single-fragment
//! download.

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::HealthResponse;
pub use server::GraftServer;
pub use state::AppState;
