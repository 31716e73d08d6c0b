//! Request-scoped get-or-create cache over the bucket tables.
//!
//! One `LogRecordCache` is built at the start of a request and handed down
//! by `&mut` to whatever translates events into rows. It remembers every row
//! it created, updated, or fetched, so repeated references to the same
//! entity, region, session, collection or user snapshot cost one backend
//! round trip per request. Entries are never evicted; the cache dies with
//! the request.
//!
//! Every backend call that returns a row ends in the same bucket insert,
//! so cache and store cannot drift apart. Memory is only touched after the
//! backend call succeeded.

use crate::backend::PersistenceBackend;
use crate::bucket::{Bucket, BucketPolicy};
use crate::error::{LogStoreError, Result};
use crate::record::{read_counter, CachedValue, Fields, Record, RecordKey};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// One cached row: its natural key and the value kept for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: CachedValue,
}

/// The cache namespace of a single bucket.
#[derive(Debug, Clone)]
pub struct BucketLog {
    bucket: Bucket,
    policy: BucketPolicy,
    entries: BTreeMap<i64, CacheEntry>,
    /// natural key -> ids holding it
    index: HashMap<String, BTreeSet<i64>>,
}

impl BucketLog {
    fn new(bucket: Bucket) -> Self {
        Self {
            bucket,
            policy: bucket.policy(),
            entries: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    pub fn policy(&self) -> BucketPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&CachedValue> {
        self.entries.get(&id).map(|entry| &entry.value)
    }

    /// Lowest id currently holding `key`, if this request has seen it.
    pub fn id_for_key(&self, key: &str) -> Option<i64> {
        self.ids_for_key(key).next()
    }

    /// Every cached id holding `key`, in ascending order.
    pub fn ids_for_key<'a>(&'a self, key: &str) -> impl Iterator<Item = i64> + 'a {
        self.index.get(key).into_iter().flatten().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &CacheEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Record `id -> value`, last write wins.
    fn put(&mut self, id: i64, key: String, value: CachedValue) {
        let previous = self.entries.insert(
            id,
            CacheEntry {
                key: key.clone(),
                value,
            },
        );
        if let Some(previous) = previous.filter(|previous| previous.key != key) {
            if let Some(ids) = self.index.get_mut(&previous.key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.index.remove(&previous.key);
                }
            }
        }
        self.index.entry(key).or_default().insert(id);
    }

    fn stored_fields(&self, id: i64) -> Result<Fields> {
        match self.get(id) {
            Some(CachedValue::Fields(fields)) => Ok(fields.clone()),
            Some(CachedValue::Key(_)) => Err(LogStoreError::contract(
                self.bucket,
                format!("entry {} holds a natural key, not a field map", id),
            )),
            None => Err(LogStoreError::NotFound {
                bucket: self.bucket.to_string(),
                id,
            }),
        }
    }
}

/// Everything one request has cached, for all seven buckets.
#[derive(Debug, Clone)]
pub struct RequestLog {
    buckets: [BucketLog; 7],
}

impl RequestLog {
    fn new() -> Self {
        Self {
            buckets: Bucket::ALL.map(BucketLog::new),
        }
    }

    pub fn bucket(&self, bucket: Bucket) -> &BucketLog {
        &self.buckets[bucket as usize]
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut BucketLog {
        &mut self.buckets[bucket as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &BucketLog> {
        self.buckets.iter()
    }

    pub fn total_entries(&self) -> usize {
        self.buckets.iter().map(BucketLog::len).sum()
    }

    /// Plain `bucket -> id -> value` copy, suitable for serialization.
    pub fn to_map(&self) -> BTreeMap<Bucket, BTreeMap<i64, CachedValue>> {
        self.buckets
            .iter()
            .map(|log| {
                let entries = log
                    .entries
                    .iter()
                    .map(|(id, entry)| (*id, entry.value.clone()))
                    .collect();
                (log.bucket, entries)
            })
            .collect()
    }
}

/// Request-scoped write-through cache for the denormalized log tables.
pub struct LogRecordCache {
    backend: Arc<dyn PersistenceBackend>,
    log: RequestLog,
}

impl LogRecordCache {
    /// Start a request with empty buckets.
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            backend,
            log: RequestLog::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn PersistenceBackend> {
        &self.backend
    }

    /// Return the id of the record identified by `key`, creating it from
    /// `fields` if needed.
    ///
    /// Natural-key buckets take `RecordKey::Natural`; a cache hit costs no
    /// backend call. Log buckets take `RecordKey::Fields`; a repeat of the
    /// same non-counter fields increments the counter on the existing row
    /// instead of inserting.
    pub fn get_or_create_record(
        &mut self,
        bucket: Bucket,
        key: impl Into<RecordKey>,
        fields: Fields,
    ) -> Result<i64> {
        let key = key.into();
        let policy = bucket.policy();
        let natural_key = policy.identity(bucket, &key, &fields)?;

        match policy {
            BucketPolicy::NaturalKey => self.get_or_create_keyed(bucket, natural_key, fields),
            BucketPolicy::CountedFields { counter } => {
                self.get_or_create_counted(bucket, counter, natural_key, fields)
            }
        }
    }

    fn get_or_create_keyed(&mut self, bucket: Bucket, key: String, fields: Fields) -> Result<i64> {
        if let Some(id) = self.log.bucket(bucket).id_for_key(&key) {
            trace!("{} cache hit for {}: {}", bucket, key, id);
            return Ok(id);
        }

        let upserted = self.backend.insert_or_fetch(bucket, &key, &fields)?;
        let id = upserted.record.id;
        debug!(
            "{} {} for key {}: {}",
            bucket,
            if upserted.created { "created" } else { "loaded" },
            key,
            id
        );

        self.log
            .bucket_mut(bucket)
            .put(id, key.clone(), CachedValue::Key(key));
        Ok(id)
    }

    fn get_or_create_counted(
        &mut self,
        bucket: Bucket,
        counter: &str,
        key: String,
        fields: Fields,
    ) -> Result<i64> {
        if let Some(id) = self.log.bucket(bucket).id_for_key(&key) {
            let current = self.log.bucket(bucket).stored_fields(id)?;
            let bumped = increment(bucket, counter, current)?;
            self.write_update(bucket, id, &key, bumped)?;
            debug!("{} {} counter incremented", bucket, id);
            return Ok(id);
        }

        let upserted = self.backend.insert_or_fetch(bucket, &key, &fields)?;
        let id = upserted.record.id;

        if upserted.created {
            debug!("{} created: {}", bucket, id);
            self.log
                .bucket_mut(bucket)
                .put(id, key, CachedValue::Fields(fields));
            return Ok(id);
        }

        // Row predates this request: count the repeat on the stored row.
        let bumped = increment(bucket, counter, upserted.record.fields)?;
        self.write_update(bucket, id, &key, bumped)?;
        debug!("{} {} loaded and counter incremented", bucket, id);
        Ok(id)
    }

    fn write_update(&mut self, bucket: Bucket, id: i64, key: &str, fields: Fields) -> Result<()> {
        if !self.backend.update(bucket, id, key, &fields)? {
            return Err(LogStoreError::NotFound {
                bucket: bucket.to_string(),
                id,
            });
        }
        let value = bucket.policy().cached_value(key, &fields);
        self.log.bucket_mut(bucket).put(id, key.to_string(), value);
        Ok(())
    }

    /// Record `id -> value` in a bucket without touching the backend.
    ///
    /// Overwrites silently if `id` is already cached. The value kind must
    /// match the bucket: a key string for natural-key buckets, a field map
    /// for log buckets.
    pub fn add_to_log(
        &mut self,
        bucket: Bucket,
        id: i64,
        value: impl Into<CachedValue>,
    ) -> Result<()> {
        let value = value.into();
        let key = bucket.policy().key_of(bucket, &value)?;
        self.log.bucket_mut(bucket).put(id, key, value);
        Ok(())
    }

    /// Id of the cached entry equal to `value`, if any.
    ///
    /// For log buckets the whole field map must match, counter included.
    /// A value of the wrong kind for the bucket is never found.
    pub fn get_log_index(&self, bucket: Bucket, value: &CachedValue) -> Option<i64> {
        let log = self.log.bucket(bucket);
        let key = log.policy.key_of(bucket, value).ok()?;
        log.ids_for_key(&key).find(|id| log.get(*id) == Some(value))
    }

    /// Read-only view of the whole cache.
    pub fn get_log(&self) -> &RequestLog {
        &self.log
    }

    /// Insert a new row and cache it.
    pub fn insert_record(
        &mut self,
        bucket: Bucket,
        key: impl Into<RecordKey>,
        fields: Fields,
    ) -> Result<i64> {
        let policy = bucket.policy();
        let natural_key = policy.identity(bucket, &key.into(), &fields)?;

        let id = self.backend.insert(bucket, &natural_key, &fields)?;
        let value = policy.cached_value(&natural_key, &fields);
        self.log.bucket_mut(bucket).put(id, natural_key, value);
        Ok(id)
    }

    /// Replace the fields of row `id` and refresh its cache entry.
    ///
    /// Natural-key rows keep their key. Log rows are re-keyed from their new
    /// fields. Returns `false` if the row does not exist.
    pub fn update_record(&mut self, bucket: Bucket, id: i64, fields: Fields) -> Result<bool> {
        let policy = bucket.policy();
        let key = match policy {
            BucketPolicy::NaturalKey => {
                let cached = self
                    .log
                    .bucket(bucket)
                    .entries
                    .get(&id)
                    .map(|entry| entry.key.clone());
                let key = match cached {
                    Some(key) => key,
                    None => match self.backend.fetch_by_id(bucket, id)? {
                        Some(record) => record.key,
                        None => return Ok(false),
                    },
                };
                policy.identity(bucket, &RecordKey::Natural(key), &fields)?
            }
            BucketPolicy::CountedFields { .. } => {
                policy.identity(bucket, &RecordKey::Fields, &fields)?
            }
        };

        if !self.backend.update(bucket, id, &key, &fields)? {
            return Ok(false);
        }
        let value = policy.cached_value(&key, &fields);
        self.log.bucket_mut(bucket).put(id, key, value);
        Ok(true)
    }

    /// Fetch row `id` from the backend and cache it.
    pub fn get_record_by_id(&mut self, bucket: Bucket, id: i64) -> Result<Option<Record>> {
        let record = self.backend.fetch_by_id(bucket, id)?;
        if let Some(record) = &record {
            self.remember(bucket, record);
        }
        Ok(record)
    }

    /// Fetch every row matching `filter` and cache them.
    pub fn find_records(&mut self, bucket: Bucket, filter: &Fields) -> Result<Vec<Record>> {
        let records = self.backend.fetch_by_filter(bucket, filter)?;
        for record in &records {
            self.remember(bucket, record);
        }
        Ok(records)
    }

    fn remember(&mut self, bucket: Bucket, record: &Record) {
        let value = bucket.policy().cached_value(&record.key, &record.fields);
        self.log
            .bucket_mut(bucket)
            .put(record.id, record.key.clone(), value);
    }
}

fn increment(bucket: Bucket, counter: &str, mut fields: Fields) -> Result<Fields> {
    let views = read_counter(&fields, counter).ok_or_else(|| {
        LogStoreError::contract(
            bucket,
            format!("stored row lacks integer counter '{}'", counter),
        )
    })?;
    fields.insert(counter.to_string(), Value::from(views + 1));
    Ok(fields)
}
