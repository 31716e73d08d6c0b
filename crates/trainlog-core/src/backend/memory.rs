//! Process-local bucket tables.

use super::traits::{PersistenceBackend, Upserted};
use crate::bucket::Bucket;
use crate::error::{LogStoreError, Result};
use crate::record::{Fields, Record};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Number of backend operations seen for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounters {
    pub inserts: usize,
    pub updates: usize,
    pub fetches: usize,
}

impl OpCounters {
    pub fn writes(&self) -> usize {
        self.inserts + self.updates
    }
}

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Record>,
}

impl Table {
    fn find_key(&self, key: &str) -> Option<&Record> {
        self.rows.values().find(|record| record.key == key)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<Bucket, Table>,
    counters: BTreeMap<Bucket, OpCounters>,
}

impl MemoryState {
    fn table(&mut self, bucket: Bucket) -> &mut Table {
        self.tables.entry(bucket).or_default()
    }

    fn counters(&mut self, bucket: Bucket) -> &mut OpCounters {
        self.counters.entry(bucket).or_default()
    }
}

/// Bucket tables held in memory, with the same natural-key uniqueness as
/// the SQLite store.
///
/// Counts every operation per bucket and can be told to fail writes, which
/// makes it the backend of choice for exercising the cache.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert/update fail until switched off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Operation counts for one bucket.
    pub fn counters(&self, bucket: Bucket) -> OpCounters {
        self.lock_state()
            .map(|state| state.counters.get(&bucket).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Operation counts summed over all buckets.
    pub fn total_counters(&self) -> OpCounters {
        Bucket::ALL
            .into_iter()
            .map(|bucket| self.counters(bucket))
            .fold(OpCounters::default(), |acc, c| OpCounters {
                inserts: acc.inserts + c.inserts,
                updates: acc.updates + c.updates,
                fetches: acc.fetches + c.fetches,
            })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| LogStoreError::Database {
            message: "Failed to acquire memory store lock".to_string(),
            source: None,
        })
    }

    fn check_writable(&self, bucket: Bucket) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LogStoreError::Database {
                message: format!("Write to {} rejected by memory store", bucket),
                source: None,
            });
        }
        Ok(())
    }

    fn insert_locked(state: &mut MemoryState, bucket: Bucket, key: &str, fields: &Fields) -> Record {
        let table = state.table(bucket);
        table.next_id += 1;
        let record = Record {
            id: table.next_id,
            key: key.to_string(),
            fields: fields.clone(),
        };
        table.rows.insert(record.id, record.clone());
        state.counters(bucket).inserts += 1;
        record
    }
}

impl PersistenceBackend for MemoryBackend {
    fn insert(&self, bucket: Bucket, key: &str, fields: &Fields) -> Result<i64> {
        self.check_writable(bucket)?;
        let mut state = self.lock_state()?;

        if state.table(bucket).find_key(key).is_some() {
            return Err(unique_violation(bucket, key));
        }

        Ok(Self::insert_locked(&mut state, bucket, key, fields).id)
    }

    fn insert_or_fetch(&self, bucket: Bucket, key: &str, fields: &Fields) -> Result<Upserted> {
        self.check_writable(bucket)?;
        let mut state = self.lock_state()?;

        let existing = state.table(bucket).find_key(key).cloned();
        if let Some(existing) = existing {
            state.counters(bucket).fetches += 1;
            return Ok(Upserted {
                record: existing,
                created: false,
            });
        }

        Ok(Upserted {
            record: Self::insert_locked(&mut state, bucket, key, fields),
            created: true,
        })
    }

    fn update(&self, bucket: Bucket, id: i64, key: &str, fields: &Fields) -> Result<bool> {
        self.check_writable(bucket)?;
        let mut state = self.lock_state()?;
        state.counters(bucket).updates += 1;

        let table = state.table(bucket);
        if !table.rows.contains_key(&id) {
            return Ok(false);
        }
        if table.find_key(key).is_some_and(|other| other.id != id) {
            return Err(unique_violation(bucket, key));
        }

        match table.rows.get_mut(&id) {
            Some(record) => {
                record.key = key.to_string();
                record.fields = fields.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn fetch_by_id(&self, bucket: Bucket, id: i64) -> Result<Option<Record>> {
        let mut state = self.lock_state()?;
        state.counters(bucket).fetches += 1;
        Ok(state.table(bucket).rows.get(&id).cloned())
    }

    fn fetch_by_key(&self, bucket: Bucket, key: &str) -> Result<Option<Record>> {
        let mut state = self.lock_state()?;
        state.counters(bucket).fetches += 1;
        Ok(state.table(bucket).find_key(key).cloned())
    }

    fn fetch_by_filter(&self, bucket: Bucket, filter: &Fields) -> Result<Vec<Record>> {
        let mut state = self.lock_state()?;
        state.counters(bucket).fetches += 1;

        Ok(state
            .table(bucket)
            .rows
            .values()
            .filter(|record| {
                filter
                    .iter()
                    .all(|(name, value)| record.fields.get(name) == Some(value))
            })
            .cloned()
            .collect())
    }

    fn row_count(&self, bucket: Bucket) -> Result<usize> {
        let mut state = self.lock_state()?;
        Ok(state.table(bucket).rows.len())
    }
}

fn unique_violation(bucket: Bucket, key: &str) -> LogStoreError {
    LogStoreError::Database {
        message: format!("UNIQUE constraint failed: {}.natural_key = {}", bucket, key),
        source: None,
    }
}
