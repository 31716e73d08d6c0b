//! Centralized configuration for the trainlog store.

/// Storage-level configuration.
pub struct StoreConfig;

impl StoreConfig {
    /// Prefix applied to every bucket table name.
    pub const TABLE_PREFIX: &'static str = "logstore_training_";
    /// Counter column incremented on repeated log writes.
    pub const COUNTER_FIELD: &'static str = "numberview";
    /// SQLite busy timeout for concurrent writers.
    pub const BUSY_TIMEOUT_MS: u64 = 30_000;
    /// Default database file name used by the CLI.
    pub const DEFAULT_DB_FILE: &'static str = "trainlog.sqlite";
}
