//! Decomposition and composition of Graft node graphs.
//!
//! The [`Decomposer`] walks a [`Node`](graft_types::Node) graph and writes it
//! to a [`Transport`](graft_transport::Transport) as content-addressed
//! fragments. Detached members become their own fragments, chunked lists are
//! split into chunk fragments, and the root carries a closure table naming
//! every descendant. The [`Composer`] reverses this, fetching each fragment
//! once and reusing shared children.

pub mod compose;
pub mod decompose;
pub mod error;
pub mod fragment;
pub mod json;

pub use compose::{ComposeHandle, Composer, ComposerConfig};
pub use decompose::{DecomposeOutcome, Decomposer, DecomposerConfig};
pub use error::{ComposeError, DecomposeError, DecomposeResult, FragmentError};
pub use fragment::{ClosureEntry, ClosureTable, FormatVersion};
pub use json::node_from_json;
