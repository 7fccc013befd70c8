//! Bounded worker pool for Graft.
//!
//! A fixed set of OS threads drains a bounded queue. Each worker keeps an
//! atomic free-worker counter current; [`WorkerPool::submit`] queues work
//! only when a worker is free and otherwise runs it on the calling thread.
//! Results come back through a single-assignment [`Promise`] that can be
//! waited on from a thread or awaited from async code.

pub mod cancel;
pub mod error;
pub mod pool;
pub mod promise;

pub use cancel::CancellationToken;
pub use error::TaskError;
pub use pool::{PoolConfig, TaskHandle, WorkerPool};
pub use promise::Promise;
