use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::types::{encode_instant, AccessMode, StoreError};
use crate::schema::tables::{store_schema, STORE_METADATA, SUBJECT_SEARCH};

const SCHEMA_HASH_KEY: &str = "schema_hash";
const CREATED_AT_KEY: &str = "created_at";

// ============================================================================
// Store
// ============================================================================

/// Handle to the local resource store.
///
/// The pool holds exactly one connection, so every statement issued through
/// any clone of the handle runs on the same connection in submission order.
/// That single connection is the serialized execution context shared by the
/// sync engine and the analytics reader.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
    mode: AccessMode,
}

impl Store {
    /// Open the store at `path`.
    ///
    /// A missing file is created (and the schema applied in one transaction)
    /// only in [`AccessMode::ReadWrite`]; read-only opens of a missing file
    /// fail instead of producing an empty store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Missing` for a read-only open of a missing file,
    /// `StoreError::SchemaMismatch` when an existing store was created from a
    /// different schema, and `StoreError::Locked` on lock contention.
    pub async fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let exists = path.exists();
        if !exists && mode.is_read_only() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }

        // busy_timeout=5000: wait for another process's lock before SQLITE_BUSY.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(!exists)
            .read_only(mode.is_read_only())
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        let store = Self::connect(options, mode).await?;
        if exists && store.has_tables().await? {
            store.verify_schema().await?;
        } else {
            store.create_schema().await?;
        }

        tracing::info!(path = %path.display(), mode = ?mode, "Opened store");
        Ok(store)
    }

    /// Open a fresh read-write store that lives only as long as the handle.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StoreError::from_sqlx)?;
        let store = Self::connect(options, AccessMode::ReadWrite).await?;
        store.create_schema().await?;
        Ok(store)
    }

    async fn connect(options: SqliteConnectOptions, mode: AccessMode) -> Result<Self, StoreError> {
        // The connection must never be recycled: an in-memory database
        // disappears with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(Self { pool, mode })
    }

    /// Release the connection. Safe to call more than once; later queries
    /// through any clone fail with a closed-pool error.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            tracing::debug!("Closed store");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode.is_read_only()
    }

    pub(crate) fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    // ========================================================================
    // Schema Lifecycle
    // ========================================================================

    async fn has_tables(&self) -> Result<bool, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        Ok(count > 0)
    }

    /// Apply every compiled DDL statement and record the schema hash, all in
    /// one transaction so a failure leaves no partial layout behind.
    async fn create_schema(&self) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let schema = store_schema();
        schema.validate()?;

        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        for statement in schema.statements() {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
        }

        let insert = format!("INSERT INTO {STORE_METADATA} (key, value) VALUES (?, ?)");
        sqlx::query(&insert)
            .bind(SCHEMA_HASH_KEY)
            .bind(schema.hash())
            .execute(&mut *tx)
            .await?;
        sqlx::query(&insert)
            .bind(CREATED_AT_KEY)
            .bind(encode_instant(Utc::now()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;

        tracing::debug!(hash = %schema.hash(), "Applied store schema");
        Ok(())
    }

    async fn verify_schema(&self) -> Result<(), StoreError> {
        let expected = store_schema().hash();
        let query = format!("SELECT value FROM {STORE_METADATA} WHERE key = ?");
        let found: Option<(String,)> = match sqlx::query_as(&query)
            .bind(SCHEMA_HASH_KEY)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("no such table") => {
                None
            }
            Err(e) => return Err(StoreError::from_sqlx(e)),
        };

        let found = found.map(|(hash,)| hash).unwrap_or_else(|| "none".to_string());
        if found != expected {
            tracing::warn!(expected = %expected, found = %found, "Store schema mismatch");
            return Err(StoreError::SchemaMismatch { expected, found });
        }
        Ok(())
    }

    /// Hash recorded when the store was created.
    pub async fn schema_hash(&self) -> Result<Option<String>, StoreError> {
        let query = format!("SELECT value FROM {STORE_METADATA} WHERE key = ?");
        let row: Option<(String,)> = sqlx::query_as(&query)
            .bind(SCHEMA_HASH_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(hash,)| hash))
    }

    /// Delete every cached row and ledger entry (logout). The schema and its
    /// metadata survive.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let schema = store_schema();

        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        for table in schema.table_names().filter(|t| *t != STORE_METADATA) {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(&format!("DELETE FROM {SUBJECT_SEARCH}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;

        tracing::info!("Store reset");
        Ok(())
    }
}
