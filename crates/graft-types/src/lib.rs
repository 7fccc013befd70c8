//! Foundation types for Graft.
//!
//! Graft decomposes dynamically-shaped object graphs into content-addressed
//! fragments and composes them back. This crate holds the vocabulary every
//! other Graft crate shares.
//!
//! # Key Types
//!
//! - [`ContentHash`] — 32-byte content address of a stored fragment
//! - [`Node`] — dynamically-extensible record with an ordered member list
//! - [`Value`] — the closed set of values a member can hold
//! - [`TypeChain`] — colon-delimited discriminator, most-derived first
//! - [`DetachPolicy`] — whether a member is inlined, detached, or chunked

pub mod chain;
pub mod error;
pub mod hash;
pub mod node;
pub mod policy;
pub mod value;

pub use chain::TypeChain;
pub use error::{TypeError, TypeResult};
pub use hash::ContentHash;
pub use node::{Member, Node, SlotKind};
pub use policy::{is_transient, validate_member_name, DetachPolicy, RESERVED_MEMBERS};
pub use value::{Value, ValueKind};
