//! Persistent storage for change records.
//!
//! Storage is reached only through [`ChangeStore`]: an idempotent
//! table-creation call and an append-only insert. Table identifiers are
//! fixed by [`Table`] and never built from input.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, PgConnection};
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::error::StorageError;

/// The two tables written by the agent. They share one schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Observed file system changes.
    Changes,

    /// Commands that ran successfully.
    Commands,
}

impl Table {
    /// SQL identifier of the table.
    pub fn name(self) -> &'static str {
        match self {
            Self::Changes => "change_in_repository",
            Self::Commands => "commands",
        }
    }

    fn create_sql(self) -> &'static str {
        match self {
            Self::Changes => {
                "CREATE TABLE IF NOT EXISTS change_in_repository (
                    time_of_change timestamp with time zone DEFAULT CURRENT_TIMESTAMP,
                    name TEXT,
                    event TEXT
                )"
            }
            Self::Commands => {
                "CREATE TABLE IF NOT EXISTS commands (
                    time_of_change timestamp with time zone DEFAULT CURRENT_TIMESTAMP,
                    name TEXT,
                    event TEXT
                )"
            }
        }
    }

    fn insert_sql(self) -> &'static str {
        match self {
            Self::Changes => "INSERT INTO change_in_repository (name, event) VALUES ($1, $2)",
            Self::Commands => "INSERT INTO commands (name, event) VALUES ($1, $2)",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// File path, or `command` for rows from the command runner.
    pub name: String,

    /// Event kind name or command text.
    pub event: String,

    /// Assigned by the store at insert time.
    pub time_of_change: DateTime<Utc>,
}

/// Append-only storage backend.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Create `table` if it does not exist. Existing rows are untouched.
    async fn ensure_table(&self, table: Table) -> Result<(), StorageError>;

    /// Append one row. The store assigns the timestamp.
    async fn insert(&self, table: Table, name: &str, event: &str) -> Result<(), StorageError>;
}

/// PostgreSQL backend. Every operation opens and closes its own connection.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    options: PgConnectOptions,
}

impl PostgresStore {
    pub fn new(config: &DatabaseConfig) -> Self {
        let ssl_mode = PgSslMode::from_str(&config.sslmode).unwrap_or_else(|_| {
            warn!(
                "Unknown sslmode {:?}, falling back to prefer",
                config.sslmode
            );
            PgSslMode::Prefer
        });

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.dbname)
            .ssl_mode(ssl_mode);

        Self { options }
    }

    async fn connect(&self) -> Result<PgConnection, StorageError> {
        PgConnection::connect_with(&self.options)
            .await
            .map_err(StorageError::Connect)
    }

    async fn release(conn: PgConnection) {
        if let Err(e) = conn.close().await {
            debug!("Error closing storage connection: {e}");
        }
    }
}

#[async_trait]
impl ChangeStore for PostgresStore {
    async fn ensure_table(&self, table: Table) -> Result<(), StorageError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(table.create_sql()).execute(&mut conn).await;
        Self::release(conn).await;

        result
            .map(|_| ())
            .map_err(|source| StorageError::Query { table, source })
    }

    async fn insert(&self, table: Table, name: &str, event: &str) -> Result<(), StorageError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(table.insert_sql())
            .bind(name)
            .bind(event)
            .execute(&mut conn)
            .await;
        Self::release(conn).await;

        result
            .map(|_| ())
            .map_err(|source| StorageError::Query { table, source })
    }
}

/// In-process store. Rows live only as long as the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, Vec<ChangeRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Table, Vec<ChangeRecord>>> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of the rows in `table`, oldest first.
    pub fn rows(&self, table: Table) -> Vec<ChangeRecord> {
        self.lock().get(&table).cloned().unwrap_or_default()
    }

    /// Whether `table` has been created.
    pub fn has_table(&self, table: Table) -> bool {
        self.lock().contains_key(&table)
    }
}

#[async_trait]
impl ChangeStore for MemoryStore {
    async fn ensure_table(&self, table: Table) -> Result<(), StorageError> {
        self.lock().entry(table).or_default();
        Ok(())
    }

    async fn insert(&self, table: Table, name: &str, event: &str) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let rows = tables
            .get_mut(&table)
            .ok_or(StorageError::MissingTable(table))?;

        let now = Utc::now();
        let time_of_change = rows
            .last()
            .map_or(now, |last| last.time_of_change.max(now));

        rows.push(ChangeRecord {
            name: name.to_string(),
            event: event.to_string(),
            time_of_change,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixed_table_names() {
        assert_eq!(Table::Changes.name(), "change_in_repository");
        assert_eq!(Table::Commands.to_string(), "commands");
        assert!(Table::Changes.insert_sql().contains("change_in_repository"));
        assert!(Table::Commands.create_sql().contains("IF NOT EXISTS commands"));
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let store = MemoryStore::new();
        store.ensure_table(Table::Changes).await.unwrap();
        store
            .insert(Table::Changes, "/data/a.log", "CREATE")
            .await
            .unwrap();

        store.ensure_table(Table::Changes).await.unwrap();

        let rows = store.rows(Table::Changes);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "/data/a.log");
    }

    #[tokio::test]
    async fn test_duplicate_inserts_are_kept() {
        let store = MemoryStore::new();
        store.ensure_table(Table::Commands).await.unwrap();
        store.insert(Table::Commands, "command", "echo hi").await.unwrap();
        store.insert(Table::Commands, "command", "echo hi").await.unwrap();

        let rows = store.rows(Table::Commands);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].time_of_change >= rows[0].time_of_change);
    }

    #[tokio::test]
    async fn test_insert_without_table_fails() {
        let store = MemoryStore::new();
        let err = store
            .insert(Table::Changes, "/data/a.log", "CREATE")
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::MissingTable(Table::Changes)));
        assert!(!store.has_table(Table::Changes));
    }

    #[test]
    fn test_postgres_store_accepts_unknown_sslmode() {
        let config = DatabaseConfig {
            sslmode: "sometimes".to_string(),
            ..DatabaseConfig::default()
        };
        let _store = PostgresStore::new(&config);
    }
}
