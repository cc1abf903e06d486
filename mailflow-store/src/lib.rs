//! Storage collaborators for the dispatch engine.
//!
//! Two boundaries live here:
//! - [`MemoryStore`]: the record store holding servers, layouts, templates,
//!   audit logs, and queue items, with the conditional operations the core
//!   relies on (single-default invariant, atomic queue claims, forward-only
//!   log transitions).
//! - [`ObjectStore`]: byte storage for EML artifacts and attachment
//!   sources, with filesystem and in-memory backends.

mod error;
mod object;
mod store;

pub use error::{RecordKind, Result, StoreError};
pub use object::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use store::{LogStats, MemoryStore};
