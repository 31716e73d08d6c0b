//! SQLite-backed bucket tables.

use super::traits::{PersistenceBackend, Upserted};
use crate::bucket::Bucket;
use crate::config::StoreConfig;
use crate::error::{LogStoreError, Result};
use crate::record::{Fields, Record};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// SQLite persistence for the seven bucket tables.
///
/// Every table carries a unique `natural_key` column, so two processes
/// racing on the same new key end up sharing one row. Thread-safe via an
/// internal mutex on the connection.
pub struct SqliteBackend {
    db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a store at `db_path`.
    ///
    /// Creates parent directories and bucket tables if they don't exist.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| LogStoreError::Io {
                    message: format!("Failed to create store directory: {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| LogStoreError::Database {
            message: format!("Failed to open store database: {}", e),
            source: Some(e),
        })?;
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;

        debug!("Opened trainlog store at {}", db_path.display());

        Ok(Self {
            db_path: Some(db_path.to_path_buf()),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        // SQLite keeps journal_mode=memory here; the other pragmas still apply.
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;

        Ok(Self {
            db_path: None,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;\n\
             PRAGMA temp_store=MEMORY;",
            StoreConfig::BUSY_TIMEOUT_MS,
        ))?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        for bucket in Bucket::ALL {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    natural_key TEXT NOT NULL UNIQUE,
                    fields_json TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );",
                table = bucket.table_name(),
            ))
            .map_err(|e| LogStoreError::Database {
                message: format!("Failed to create table for bucket {}: {}", bucket, e),
                source: Some(e),
            })?;
        }
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LogStoreError::Database {
            message: "Failed to acquire store connection lock".to_string(),
            source: None,
        })
    }

    fn decode(id: i64, key: String, fields_json: &str) -> Result<Record> {
        let fields: Fields = serde_json::from_str(fields_json)?;
        Ok(Record { id, key, fields })
    }

    fn query_by_key(conn: &Connection, bucket: Bucket, key: &str) -> Result<Option<Record>> {
        let row: Option<(i64, String, String)> = conn
            .query_row(
                &format!(
                    "SELECT id, natural_key, fields_json FROM {} WHERE natural_key = ?1",
                    bucket.table_name()
                ),
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(id, key, json)| Self::decode(id, key, &json))
            .transpose()
    }

    /// Translate a filter value into a SQL comparison on one JSON field.
    ///
    /// The JSON type is compared as well as the value, so `true` never
    /// matches `1` and `2` never matches `2.0`.
    fn filter_clause(
        bucket: Bucket,
        name: &str,
        value: &Value,
        args: &mut Vec<SqlValue>,
    ) -> Result<String> {
        if name.contains('"') {
            return Err(LogStoreError::contract(
                bucket,
                format!("filter field name {:?} contains a quote", name),
            ));
        }
        args.push(SqlValue::Text(format!("$.\"{}\"", name)));
        let path_arg = args.len();

        let (json_type, compared) = match value {
            Value::Null => ("null", None),
            Value::Bool(true) => ("true", None),
            Value::Bool(false) => ("false", None),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ("integer", Some(SqlValue::Integer(i))),
                None => ("real", Some(SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)))),
            },
            Value::String(s) => ("text", Some(SqlValue::Text(s.clone()))),
            Value::Array(_) => ("array", Some(SqlValue::Text(serde_json::to_string(value)?))),
            Value::Object(_) => ("object", Some(SqlValue::Text(serde_json::to_string(value)?))),
        };

        let type_check = format!("json_type(fields_json, ?{}) = '{}'", path_arg, json_type);
        Ok(match compared {
            Some(compared) => {
                args.push(compared);
                format!(
                    "({} AND json_extract(fields_json, ?{}) = ?{})",
                    type_check,
                    path_arg,
                    args.len()
                )
            }
            None => type_check,
        })
    }
}

impl PersistenceBackend for SqliteBackend {
    fn insert(&self, bucket: Bucket, key: &str, fields: &Fields) -> Result<i64> {
        let conn = self.lock_conn()?;
        let fields_json = serde_json::to_string(fields)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            &format!(
                "INSERT INTO {} (natural_key, fields_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                bucket.table_name()
            ),
            params![key, fields_json, now],
        )
        .map_err(|e| LogStoreError::Database {
            message: format!("Failed to insert into {}: {}", bucket, e),
            source: Some(e),
        })?;

        let id = conn.last_insert_rowid();
        debug!("Inserted {} row {} for key {}", bucket, id, key);
        Ok(id)
    }

    fn insert_or_fetch(&self, bucket: Bucket, key: &str, fields: &Fields) -> Result<Upserted> {
        let conn = self.lock_conn()?;
        let fields_json = serde_json::to_string(fields)?;
        let now = Utc::now().to_rfc3339();

        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO {} (natural_key, fields_json, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(natural_key) DO NOTHING",
                    bucket.table_name()
                ),
                params![key, fields_json, now],
            )
            .map_err(|e| LogStoreError::Database {
                message: format!("Failed to insert into {}: {}", bucket, e),
                source: Some(e),
            })?;

        if inserted > 0 {
            let id = conn.last_insert_rowid();
            debug!("Inserted {} row {} for key {}", bucket, id, key);
            return Ok(Upserted {
                record: Record {
                    id,
                    key: key.to_string(),
                    fields: fields.clone(),
                },
                created: true,
            });
        }

        let record =
            Self::query_by_key(&conn, bucket, key)?.ok_or_else(|| LogStoreError::Database {
                message: format!("{} row for key {} vanished after conflict", bucket, key),
                source: None,
            })?;
        debug!("Reused existing {} row {} for key {}", bucket, record.id, key);

        Ok(Upserted {
            record,
            created: false,
        })
    }

    fn update(&self, bucket: Bucket, id: i64, key: &str, fields: &Fields) -> Result<bool> {
        let conn = self.lock_conn()?;
        let fields_json = serde_json::to_string(fields)?;
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                &format!(
                    "UPDATE {} SET natural_key = ?1, fields_json = ?2, updated_at = ?3
                     WHERE id = ?4",
                    bucket.table_name()
                ),
                params![key, fields_json, now, id],
            )
            .map_err(|e| LogStoreError::Database {
                message: format!("Failed to update {} row {}: {}", bucket, id, e),
                source: Some(e),
            })?;

        Ok(rows > 0)
    }

    fn fetch_by_id(&self, bucket: Bucket, id: i64) -> Result<Option<Record>> {
        let conn = self.lock_conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                &format!(
                    "SELECT natural_key, fields_json FROM {} WHERE id = ?1",
                    bucket.table_name()
                ),
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(key, json)| Self::decode(id, key, &json))
            .transpose()
    }

    fn fetch_by_key(&self, bucket: Bucket, key: &str) -> Result<Option<Record>> {
        let conn = self.lock_conn()?;
        Self::query_by_key(&conn, bucket, key)
    }

    fn fetch_by_filter(&self, bucket: Bucket, filter: &Fields) -> Result<Vec<Record>> {
        let mut args = Vec::new();
        let mut clauses = Vec::new();
        for (name, value) in filter {
            clauses.push(Self::filter_clause(bucket, name, value, &mut args)?);
        }

        let mut sql = format!(
            "SELECT id, natural_key, fields_json FROM {}",
            bucket.table_name()
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, key, json) = row?;
            records.push(Self::decode(id, key, &json)?);
        }

        Ok(records)
    }

    fn row_count(&self, bucket: Bucket) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", bucket.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
