//! The fixed set of denormalized log tables and their equality policies.

use crate::config::StoreConfig;
use crate::error::{LogStoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One denormalized log table, and one cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Log,
    LogHistory,
    Session,
    Collection,
    User,
    Region,
    Entity,
}

impl Bucket {
    /// Every bucket, in table creation order.
    pub const ALL: [Bucket; 7] = [
        Bucket::Log,
        Bucket::LogHistory,
        Bucket::Session,
        Bucket::Collection,
        Bucket::User,
        Bucket::Region,
        Bucket::Entity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Log => "log",
            Bucket::LogHistory => "log_history",
            Bucket::Session => "session",
            Bucket::Collection => "collection",
            Bucket::User => "user",
            Bucket::Region => "region",
            Bucket::Entity => "entity",
        }
    }

    /// Backing table name, e.g. `logstore_training_log_history`.
    pub fn table_name(&self) -> String {
        format!("{}{}", StoreConfig::TABLE_PREFIX, self.as_str())
    }

    /// How records in this bucket are considered "the same".
    pub fn policy(&self) -> BucketPolicy {
        match self {
            Bucket::Log | Bucket::LogHistory => BucketPolicy::CountedFields {
                counter: StoreConfig::COUNTER_FIELD,
            },
            Bucket::Session
            | Bucket::Collection
            | Bucket::User
            | Bucket::Region
            | Bucket::Entity => BucketPolicy::NaturalKey,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = LogStoreError;

    fn from_str(s: &str) -> Result<Self> {
        Bucket::ALL
            .into_iter()
            .find(|bucket| bucket.as_str() == s)
            .ok_or_else(|| LogStoreError::UnknownBucket(s.to_string()))
    }
}

/// Per-bucket identity rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketPolicy {
    /// Identity is a caller-supplied string; the cache stores only that key.
    NaturalKey,
    /// Identity is every field except `counter`; repeated writes bump the
    /// counter instead of inserting. The cache stores the full field map.
    CountedFields { counter: &'static str },
}

impl BucketPolicy {
    pub fn counter(&self) -> Option<&'static str> {
        match self {
            BucketPolicy::NaturalKey => None,
            BucketPolicy::CountedFields { counter } => Some(counter),
        }
    }

    pub fn is_counted(&self) -> bool {
        matches!(self, BucketPolicy::CountedFields { .. })
    }
}
