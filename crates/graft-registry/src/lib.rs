//! Type registry for Graft.
//!
//! Maps a node's type discriminator to a [`TypeDescriptor`]: the members it
//! declares (with their expected kinds and detachment policies) and the hooks
//! to run after a node of that type has been rebuilt. Resolution never fails;
//! a discriminator with no registered segment resolves to the untyped bag.

pub mod cache;
pub mod descriptor;
pub mod error;
pub mod registry;
pub mod strategy;

pub use cache::SnapshotCache;
pub use descriptor::{MemberAccessor, MemberTable, PostDecodeHook, TypeDescriptor, TypeProvider};
pub use error::{AccessorError, HookError, RegistryError, RegistryResult};
pub use registry::{Resolution, TypeRegistry};
pub use strategy::{MemberNameStrategy, NameStrategy};
