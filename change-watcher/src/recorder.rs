//! Timestamped recording of changes and executed commands.

use std::sync::Arc;

use tracing::error;

use crate::error::StorageError;
use crate::store::{ChangeStore, Table};

/// Subject recorded for rows written by the command runner.
pub const COMMAND_SUBJECT: &str = "command";

/// Writes change records through a [`ChangeStore`].
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn ChangeStore>,
}

impl Recorder {
    pub fn new(store: Arc<dyn ChangeStore>) -> Self {
        Self { store }
    }

    /// Ensure both tables exist.
    pub async fn prepare(&self) -> Result<(), StorageError> {
        for table in [Table::Changes, Table::Commands] {
            self.store.ensure_table(table).await.inspect_err(|e| {
                error!("Error creating table {table}: {e}");
            })?;
        }
        Ok(())
    }

    /// Append one row to `table`. Errors are logged and returned.
    pub async fn record(
        &self,
        table: Table,
        subject: &str,
        event: &str,
    ) -> Result<(), StorageError> {
        let result = async {
            self.store.ensure_table(table).await?;
            self.store.insert(table, subject, event).await
        }
        .await;

        if let Err(ref e) = result {
            error!("Error inserting into {table}: {e}");
        }
        result
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_record_creates_table_on_demand() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::new(store.clone());

        recorder
            .record(Table::Changes, "/data/a.log", "CREATE")
            .await
            .unwrap();

        let rows = store.rows(Table::Changes);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event, "CREATE");
        assert!(store.rows(Table::Commands).is_empty());
    }

    #[test]
    fn test_prepare_creates_both_tables() {
        let store = Arc::new(MemoryStore::new());
        tokio_test::block_on(Recorder::new(store.clone()).prepare()).unwrap();

        assert!(store.has_table(Table::Changes));
        assert!(store.has_table(Table::Commands));
    }
}
