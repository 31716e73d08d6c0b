//! Trainlog Core - request-scoped write path for training log tables.
//!
//! Training events are denormalized into seven tables (log, log_history,
//! session, collection, user, region, entity). Events in one request tend to
//! reference the same entity, region or session over and over, so writes go
//! through a [`LogRecordCache`] that turns those repeats into cache hits and
//! turns repeated log writes into view-counter increments.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trainlog_core::{Bucket, LogRecordCache, SqliteBackend};
//!
//! let backend = Arc::new(SqliteBackend::open("trainlog.sqlite")?);
//! let mut cache = LogRecordCache::new(backend);
//!
//! let region = cache.get_or_create_record(Bucket::Region, "North", fields)?;
//! ```

pub mod backend;
pub mod bucket;
pub mod cache;
pub mod config;
pub mod error;
pub mod record;
pub mod recorder;

// Re-export commonly used types
pub use backend::{
    BackendStats, MemoryBackend, OpCounters, PersistenceBackend, SqliteBackend, Upserted,
};
pub use bucket::{Bucket, BucketPolicy};
pub use cache::{BucketLog, CacheEntry, LogRecordCache, RequestLog};
pub use config::StoreConfig;
pub use error::{LogStoreError, Result};
pub use record::{into_fields, CachedValue, Fields, Record, RecordKey};
pub use recorder::{
    EventRecorder, RecordedIds, RequestSummary, SessionRef, TrainingEvent, UserProfile,
};
