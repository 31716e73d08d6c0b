//! Persistence backends for the bucket tables.
//!
//! - `SqliteBackend`: one SQLite table per bucket, natural keys enforced
//!   by a unique constraint
//! - `MemoryBackend`: process-local tables with operation counters
//!
//! The cache only talks to the `PersistenceBackend` trait.

mod memory;
mod sqlite;
mod traits;

pub use memory::{MemoryBackend, OpCounters};
pub use sqlite::SqliteBackend;
pub use traits::{BackendStats, PersistenceBackend, Upserted};
