//! Content hashing for Graft.
//!
//! Every fragment is addressed by a domain-separated BLAKE3 digest of its
//! canonical JSON bytes. The canonical form drops the envelope members that
//! do not describe content (`id` and anything prefixed with `__`).

pub mod hasher;

pub use hasher::{canonical_bytes, ContentHasher, HasherError};
