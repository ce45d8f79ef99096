//! Database session backend
//!
//! This backend keeps sessions in a SQL table described by a
//! [`SessionTable`]. Each row holds the encoded session values under an
//! auto-incrementing integer identifier.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use sqlstore::backend::db::DbBackend;
//! use sqlstore::db::{Database, SessionTable};
//!
//! # #[tokio::main]
//! # async fn main() -> sqlstore::Result<()> {
//! let database = Arc::new(Database::new("sqlite::memory:").await?);
//! let table = SessionTable::default();
//! database.create_table(&table).await?;
//!
//! let backend = DbBackend::new(database, table)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{BackendError, Result, SessionBackend};
use crate::db::{Database, SessionTable};

/// A session backend that stores sessions in a SQL table.
#[derive(Debug, Clone)]
pub struct DbBackend {
    connection: Arc<Database>,
    table: SessionTable,
}

impl DbBackend {
    /// Creates a new `DbBackend` storing sessions in `table`.
    ///
    /// The table has to exist already; see [`Database::create_table`].
    ///
    /// # Errors
    ///
    /// Returns an error if a name in `table` is not a valid SQL identifier.
    pub fn new(connection: Arc<Database>, table: SessionTable) -> Result<Self> {
        table.validate()?;
        Ok(Self { connection, table })
    }

    /// The table sessions are stored in.
    #[must_use]
    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    /// The underlying database connection.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.connection
    }
}

#[async_trait]
impl SessionBackend for DbBackend {
    async fn select(&self, id: i64) -> Result<Option<String>> {
        Ok(self.connection.select_data(&self.table, id).await?)
    }

    async fn insert(&self, data: &str) -> Result<i64> {
        self.connection
            .insert_data(&self.table, data)
            .await?
            .ok_or(BackendError::MissingInsertId)
    }

    async fn update(&self, id: i64, data: &str) -> Result<bool> {
        let result = self.connection.update_data(&self.table, id, data).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.connection.delete_data(&self.table, id).await?;
        Ok(())
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::db::DatabaseError;

    async fn backend() -> DbBackend {
        let database = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let table = SessionTable::default();
        database.create_table(&table).await.unwrap();
        DbBackend::new(database, table).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_select() {
        let backend = backend().await;

        let id = backend.insert("data").await.unwrap();

        assert_eq!(backend.select(id).await.unwrap().as_deref(), Some("data"));
    }

    #[tokio::test]
    async fn test_select_missing() {
        let backend = backend().await;

        assert_eq!(backend.select(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update() {
        let backend = backend().await;
        let id = backend.insert("old").await.unwrap();

        assert!(backend.update(id, "new").await.unwrap());
        assert!(!backend.update(id + 1, "new").await.unwrap());
        assert_eq!(backend.select(id).await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = backend().await;
        let id = backend.insert("data").await.unwrap();

        backend.delete(id).await.unwrap();
        backend.delete(id).await.unwrap();

        assert_eq!(backend.select(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_table() {
        let database = Arc::new(Database::new("sqlite::memory:").await.unwrap());

        let error = DbBackend::new(database, SessionTable::new("my sessions", "id", "data"))
            .unwrap_err();

        assert!(matches!(
            error,
            BackendError::Database(DatabaseError::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_table() {
        let database = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let backend = DbBackend::new(database, SessionTable::default()).unwrap();

        let error = backend.insert("data").await.unwrap_err();

        assert!(matches!(error, BackendError::Database(_)));
    }
}
