//! Persistence backend trait and types.

use crate::bucket::Bucket;
use crate::error::Result;
use crate::record::{Fields, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of an insert-or-fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub record: Record,
    /// False when a row with the same natural key already existed.
    pub created: bool,
}

/// Row counts per bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendStats {
    pub rows: BTreeMap<Bucket, usize>,
    pub total_rows: usize,
}

/// Relational store for the bucket tables.
///
/// Each bucket maps to one table with a unique natural-key column, so
/// deduplication survives across processes. All operations are synchronous
/// to match rusqlite's API.
pub trait PersistenceBackend: Send + Sync {
    /// Insert a new row and return its assigned id.
    ///
    /// Fails if a row with the same natural key exists.
    fn insert(&self, bucket: Bucket, key: &str, fields: &Fields) -> Result<i64>;

    /// Insert a row, or return the existing row holding `key`.
    fn insert_or_fetch(&self, bucket: Bucket, key: &str, fields: &Fields) -> Result<Upserted>;

    /// Replace the natural key and fields of row `id`.
    ///
    /// Returns `false` if no such row exists.
    fn update(&self, bucket: Bucket, id: i64, key: &str, fields: &Fields) -> Result<bool>;

    fn fetch_by_id(&self, bucket: Bucket, id: i64) -> Result<Option<Record>>;

    fn fetch_by_key(&self, bucket: Bucket, key: &str) -> Result<Option<Record>>;

    /// Rows whose fields contain every `(name, value)` pair of `filter`.
    ///
    /// An empty filter returns the whole table, ordered by id.
    fn fetch_by_filter(&self, bucket: Bucket, filter: &Fields) -> Result<Vec<Record>>;

    fn row_count(&self, bucket: Bucket) -> Result<usize>;

    /// Row counts across all buckets.
    fn stats(&self) -> Result<BackendStats> {
        let mut stats = BackendStats::default();
        for bucket in Bucket::ALL {
            let count = self.row_count(bucket)?;
            stats.total_rows += count;
            stats.rows.insert(bucket, count);
        }
        Ok(stats)
    }
}
