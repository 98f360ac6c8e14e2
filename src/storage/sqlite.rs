//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Merge in the engine**: writes are upserts whose conflict clause adds
//!   counter deltas and overwrites gauge values, so concurrent writers
//!   (even from other processes) never lose an increment
//! - **Fixed kinds**: the conflict clause only fires when the stored kind
//!   matches; a write that changes nothing is reported as a type mismatch
//! - **No overflow**: a counter total past the `i64` range is refused by the
//!   same clause and reported as a validation error
//! - **Atomic batches**: `set_all` runs every upsert in one transaction
//! - **Retries**: every call runs under the `RetryExecutor` with a per-call
//!   deadline, consulting the `ErrorClassifier`. Writes that hit the
//!   deadline are not retried, they may still have committed
//! - **WAL mode**: Better concurrency for reads during writes
//!
//! ## Schema
//!
//! One table keyed by metric name, created on connect if missing:
//!
//! ```sql
//! CREATE TABLE metrics (name TEXT PRIMARY KEY, mtype TEXT NOT NULL,
//!                       delta INTEGER, value REAL, digest TEXT)
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode,
    SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tokio::time;
use tracing::{debug, info, instrument};

use super::backend::StorageBackend;
use super::classifier::{ErrorClass, ErrorClassifier, WriteClassifier};
use super::error::{StorageError, StorageResult, ValidationError};
use super::retry::RetryExecutor;
use super::schema::{MetricKind, MetricRecord};

/// Deadline for a single database call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS metrics (
        name   TEXT PRIMARY KEY,
        mtype  TEXT NOT NULL,
        delta  INTEGER,
        value  REAL,
        digest TEXT
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO metrics (name, mtype, delta, value, digest)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT (name) DO UPDATE SET
        delta = CASE
            WHEN excluded.mtype = 'counter' THEN COALESCE(metrics.delta, 0) + excluded.delta
            ELSE excluded.delta
        END,
        value = excluded.value,
        digest = excluded.digest
    WHERE metrics.mtype = excluded.mtype
      AND (excluded.mtype <> 'counter'
           OR typeof(COALESCE(metrics.delta, 0) + excluded.delta) = 'integer')
"#;

const SELECT_ONE: &str = "SELECT name, mtype, delta, value, digest FROM metrics WHERE name = ?";

const SELECT_ALL: &str = "SELECT name, mtype, delta, value, digest FROM metrics";

/// Tuning for [`SqliteBackend`]
#[derive(Debug, Clone)]
pub struct SqliteSettings {
    /// Deadline for each individual database call
    pub call_timeout: Duration,

    /// Retry schedule for transient failures
    pub retry: RetryExecutor,

    pub max_connections: u32,
}

impl Default for SqliteSettings {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryExecutor::default(),
            max_connections: 5,
        }
    }
}

fn db_error(op: &'static str) -> impl FnOnce(sqlx::Error) -> StorageError {
    move |source| StorageError::Database { op, source }
}

/// Bound a single attempt by the call deadline
async fn with_timeout<T>(
    op: &'static str,
    after: Duration,
    call: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    match time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout { op, after }),
    }
}

fn upsert_query(record: &MetricRecord) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(UPSERT)
        .bind(record.id.as_str())
        .bind(record.kind.as_str())
        .bind(record.delta)
        .bind(record.value)
        .bind(record.digest.as_deref())
}

fn record_from_row(row: &SqliteRow) -> StorageResult<MetricRecord> {
    let kind: String = row.try_get("mtype").map_err(db_error("decode"))?;
    let kind: MetricKind = kind
        .parse()
        .map_err(|err: ValidationError| db_error("decode")(sqlx::Error::Decode(Box::new(err))))?;

    Ok(MetricRecord {
        id: row.try_get("name").map_err(db_error("decode"))?,
        kind,
        delta: row.try_get("delta").map_err(db_error("decode"))?,
        value: row.try_get("value").map_err(db_error("decode"))?,
        digest: row.try_get("digest").map_err(db_error("decode"))?,
    })
}

/// Build the error for an upsert whose conflict clause refused the write
///
/// The stored kind differs, or the counter total left the `i64` range
/// (SQLite turns such a sum into REAL).
async fn refused_write(
    conn: &mut SqliteConnection,
    op: &'static str,
    record: &MetricRecord,
) -> StorageError {
    let stored: Result<Option<String>, _> =
        sqlx::query_scalar("SELECT mtype FROM metrics WHERE name = ?")
            .bind(record.id.as_str())
            .fetch_optional(conn)
            .await;

    let stored = match stored {
        Ok(stored) => stored.and_then(|kind| kind.parse::<MetricKind>().ok()),
        Err(source) => return StorageError::Database { op, source },
    };

    let err = match stored {
        Some(stored) if stored == record.kind && stored == MetricKind::Counter => {
            ValidationError::CounterOverflow {
                id: record.id.clone(),
            }
        }
        stored => ValidationError::TypeMismatch {
            id: record.id.clone(),
            stored: stored.unwrap_or(record.kind),
            incoming: record.kind,
        },
    };
    err.into()
}

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
    call_timeout: Duration,
    retry: RetryExecutor,
    classifier: ErrorClassifier,
    write_classifier: WriteClassifier,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` with default settings
    ///
    /// ```no_run
    /// # use telemetry_store::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./metrics.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_settings(db_path, SqliteSettings::default()).await
    }

    /// Open the database, retrying connection setup and schema bootstrap
    #[instrument(skip_all)]
    pub async fn with_settings(
        db_path: impl AsRef<Path>,
        settings: SqliteSettings,
    ) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal) // WAL mode for better concurrency
            .synchronous(SqliteSynchronous::Normal)
            // Give up on a held lock well before the call deadline, SQLITE_BUSY is safe to retry
            .busy_timeout(settings.call_timeout / 2);

        // Any failure while establishing the pool is worth another attempt
        let retry_all = |_: &StorageError| ErrorClass::Retriable;

        let pool = settings
            .retry
            .run("connect", &retry_all, || {
                let pool_options = SqlitePoolOptions::new()
                    .max_connections(settings.max_connections)
                    .acquire_timeout(settings.call_timeout);
                let options = options.clone();
                with_timeout("connect", settings.call_timeout, async move {
                    pool_options
                        .connect_with(options)
                        .await
                        .map_err(|e| StorageError::ConnectionFailed(e.to_string()))
                })
            })
            .await?;

        info!("SQLite connection pool created");

        let backend = Self {
            pool,
            db_path: db_path_str,
            call_timeout: settings.call_timeout,
            retry: settings.retry,
            classifier: ErrorClassifier::new(),
            write_classifier: WriteClassifier,
        };

        backend
            .retry
            .run("create_schema", &backend.classifier, || {
                with_timeout("create_schema", backend.call_timeout, async {
                    sqlx::query(CREATE_TABLE)
                        .execute(&backend.pool)
                        .await
                        .map_err(db_error("create_schema"))?;
                    Ok(())
                })
            })
            .await?;

        debug!("metrics table ready");
        Ok(backend)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Connectivity probe, bounded by the call deadline and retry schedule
    #[instrument(skip(self))]
    pub async fn ping(&self) -> StorageResult<()> {
        self.retry
            .run("ping", &self.classifier, || {
                with_timeout("ping", self.call_timeout, async {
                    sqlx::query("SELECT 1")
                        .execute(&self.pool)
                        .await
                        .map_err(db_error("ping"))?;
                    Ok(())
                })
            })
            .await
    }

    /// Close the pool, waiting for checked-out connections to return
    pub async fn close(&self) {
        info!("closing SQLite backend");
        self.pool.close().await;
    }

    async fn upsert_once(&self, record: &MetricRecord) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await.map_err(db_error("set"))?;

        let result = upsert_query(record)
            .execute(&mut *conn)
            .await
            .map_err(db_error("set"))?;

        if result.rows_affected() == 0 {
            return Err(refused_write(&mut conn, "set", record).await);
        }
        Ok(())
    }

    async fn upsert_batch_once(&self, batch: &[MetricRecord]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_error("set_all"))?;

        // Same SQL text for every record, so sqlx prepares the statement once
        // per connection and reuses it for the whole batch.
        for record in batch {
            let result = upsert_query(record)
                .execute(&mut *tx)
                .await
                .map_err(db_error("set_all"))?;

            if result.rows_affected() == 0 {
                let err = refused_write(&mut tx, "set_all", record).await;
                tx.rollback().await.map_err(db_error("set_all"))?;
                return Err(err);
            }
        }

        tx.commit().await.map_err(db_error("set_all"))?;
        Ok(())
    }

    async fn get_once(&self, id: &str) -> StorageResult<Option<MetricRecord>> {
        let row = sqlx::query(SELECT_ONE)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get"))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_all_once(&self) -> StorageResult<HashMap<String, MetricRecord>> {
        let rows = sqlx::query(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("get_all"))?;

        rows.iter()
            .map(|row| record_from_row(row).map(|record| (record.id.clone(), record)))
            .collect()
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, record), fields(kind = %record.kind))]
    async fn set(&self, id: &str, record: MetricRecord) -> StorageResult<()> {
        record.validate_for_key(id)?;

        self.retry
            .run("set", &self.write_classifier, || {
                with_timeout("set", self.call_timeout, self.upsert_once(&record))
            })
            .await
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> StorageResult<Option<MetricRecord>> {
        self.retry
            .run("get", &self.classifier, || {
                with_timeout("get", self.call_timeout, self.get_once(id))
            })
            .await
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> StorageResult<HashMap<String, MetricRecord>> {
        let metrics = self
            .retry
            .run("get_all", &self.classifier, || {
                with_timeout("get_all", self.call_timeout, self.get_all_once())
            })
            .await?;

        debug!("loaded {} metrics", metrics.len());
        Ok(metrics)
    }

    #[instrument(skip(self, batch), fields(count = batch.len()))]
    async fn set_all(&self, batch: Vec<MetricRecord>) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        for record in &batch {
            record.validate()?;
        }

        self.retry
            .run("set_all", &self.write_classifier, || {
                with_timeout("set_all", self.call_timeout, self.upsert_batch_once(&batch))
            })
            .await?;

        debug!("batch upsert complete");
        Ok(())
    }
}
