//! Database support for the session table.
//!
//! This module contains the database connection structure, the description of
//! the session table, and the error types that can occur when interacting with
//! the database. Statements are built with `SeaQuery` and executed with `sqlx`,
//! so the same code works for every supported engine.

#[cfg(feature = "mysql")]
mod impl_mysql;
#[cfg(feature = "postgres")]
mod impl_postgres;
#[cfg(feature = "sqlite")]
mod impl_sqlite;
mod sea_query_db;

use sea_query::{Alias, ColumnDef, Expr, Query, SchemaStatementBuilder, Table};
use sea_query_binder::SqlxBinder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument, Level, span, trace};

#[cfg(feature = "mysql")]
use crate::db::impl_mysql::DatabaseMySql;
#[cfg(feature = "postgres")]
use crate::db::impl_postgres::DatabasePostgres;
#[cfg(feature = "sqlite")]
use crate::db::impl_sqlite::DatabaseSqlite;

/// An error that can occur when interacting with the database.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DatabaseError {
    /// Database engine error.
    #[error("Database engine error: {0}")]
    DatabaseEngineError(#[from] sqlx::Error),
    /// Error when building query.
    #[error("Error when building query: {0}")]
    QueryBuildingError(#[from] sea_query::error::Error),
    /// A table or column name is not a plain SQL identifier.
    #[error("Invalid identifier `{0}`: only ASCII letters, digits and underscores are allowed")]
    InvalidIdentifier(String),
    /// The database URL does not name a supported (or enabled) engine.
    #[error("Unsupported database URL scheme: `{0}`")]
    UnsupportedUrl(String),
}

/// An alias for [`Result`] that uses [`DatabaseError`] as the error type.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// The table the sessions are stored in.
///
/// The table has two columns: an auto-incrementing integer primary key and a
/// text column holding the encoded session values.
///
/// # Examples
///
/// ```
/// use sqlstore::db::SessionTable;
///
/// let table = SessionTable::default();
/// assert_eq!(table.table, "sessions");
/// assert_eq!(table.id_column, "id");
/// assert_eq!(table.data_column, "data");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTable {
    /// The name of the table.
    pub table: String,
    /// The name of the primary key column.
    pub id_column: String,
    /// The name of the column holding the encoded session values.
    pub data_column: String,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self {
            table: "sessions".to_owned(),
            id_column: "id".to_owned(),
            data_column: "data".to_owned(),
        }
    }
}

impl SessionTable {
    /// Creates a new table description.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        id_column: impl Into<String>,
        data_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            id_column: id_column.into(),
            data_column: data_column.into(),
        }
    }

    /// Checks that every name is a plain SQL identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidIdentifier`] for the first name that
    /// is empty, starts with a digit, or contains anything other than ASCII
    /// letters, digits and underscores.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlstore::db::SessionTable;
    ///
    /// assert!(SessionTable::new("sessions", "id", "data").validate().is_ok());
    /// assert!(SessionTable::new("sessions; --", "id", "data").validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        for name in [&self.table, &self.id_column, &self.data_column] {
            if !is_identifier(name) {
                return Err(DatabaseError::InvalidIdentifier(name.clone()));
            }
        }
        Ok(())
    }

    fn table_iden(&self) -> Alias {
        Alias::new(self.table.as_str())
    }

    fn id_iden(&self) -> Alias {
        Alias::new(self.id_column.as_str())
    }

    fn data_iden(&self) -> Alias {
        Alias::new(self.data_column.as_str())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A database connection structure that holds the connection pool.
///
/// The connection is established when the structure is created and closed
/// when [`Self::close()`] is called.
#[derive(Debug)]
pub struct Database {
    inner: DatabaseImpl,
}

#[derive(Debug)]
enum DatabaseImpl {
    #[cfg(feature = "sqlite")]
    Sqlite(DatabaseSqlite),
    #[cfg(feature = "postgres")]
    Postgres(DatabasePostgres),
    #[cfg(feature = "mysql")]
    MySql(DatabaseMySql),
}

impl Database {
    /// Creates a new database connection. The connection string should be in
    /// the format of the database URL.
    ///
    /// # Errors
    ///
    /// This method can return an error if the connection to the database could
    /// not be established.
    ///
    /// This method returns [`DatabaseError::UnsupportedUrl`] if the URL does
    /// not name an engine enabled in this build.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlstore::db::Database;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> sqlstore::db::Result<()> {
    /// let db = Database::new("sqlite::memory:").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new<T: Into<String>>(url: T) -> Result<Self> {
        let url = url.into();

        #[cfg(feature = "sqlite")]
        if url.starts_with("sqlite:") {
            let inner = DatabaseSqlite::new(&url).await?;
            return Ok(Self {
                inner: DatabaseImpl::Sqlite(inner),
            });
        }

        #[cfg(feature = "postgres")]
        if url.starts_with("postgresql:") || url.starts_with("postgres:") {
            let inner = DatabasePostgres::new(&url).await?;
            return Ok(Self {
                inner: DatabaseImpl::Postgres(inner),
            });
        }

        #[cfg(feature = "mysql")]
        if url.starts_with("mysql:") {
            let inner = DatabaseMySql::new(&url).await?;
            return Ok(Self {
                inner: DatabaseImpl::MySql(inner),
            });
        }

        let scheme = url.split(':').next().unwrap_or_default();
        Err(DatabaseError::UnsupportedUrl(scheme.to_owned()))
    }

    /// Closes the database connection.
    ///
    /// # Errors
    ///
    /// This method can return an error if the connection to the database could
    /// not be closed gracefully.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlstore::db::Database;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> sqlstore::db::Result<()> {
    /// let db = Database::new("sqlite::memory:").await?;
    /// db.close().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn close(&self) -> Result<()> {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            DatabaseImpl::Sqlite(inner) => inner.close().await,
            #[cfg(feature = "postgres")]
            DatabaseImpl::Postgres(inner) => inner.close().await,
            #[cfg(feature = "mysql")]
            DatabaseImpl::MySql(inner) => inner.close().await,
        }
    }

    /// Creates the session table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// This method can return an error if a name in `table` is not a valid
    /// identifier or the statement fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlstore::db::{Database, SessionTable};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> sqlstore::db::Result<()> {
    /// let db = Database::new("sqlite::memory:").await?;
    /// db.create_table(&SessionTable::default()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_table(&self, table: &SessionTable) -> Result<StatementResult> {
        table.validate()?;

        let statement = Table::create()
            .table(table.table_iden())
            .if_not_exists()
            .col(
                ColumnDef::new_with_type(table.id_iden(), self.id_column_type())
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(table.data_iden()).text().not_null())
            .to_owned();

        self.execute_schema(statement).await
    }

    /// Returns the encoded values stored under `id`.
    ///
    /// # Errors
    ///
    /// This method can return an error if the query fails, for instance
    /// because the table does not exist.
    pub async fn select_data(&self, table: &SessionTable, id: i64) -> Result<Option<String>> {
        let span = span!(Level::TRACE, "select", table = %table.table, id);

        let statement = Query::select()
            .column(table.data_iden())
            .from(table.table_iden())
            .and_where(Expr::col(table.id_iden()).eq(id))
            .limit(1)
            .to_owned();

        self.fetch_string(&statement).instrument(span).await
    }

    /// Inserts a row holding `data` and returns its identifier.
    ///
    /// The identifier is read back with a `RETURNING` clause where the engine
    /// supports one, and from the statement result otherwise.
    ///
    /// # Errors
    ///
    /// This method can return an error if the statement fails.
    pub async fn insert_data(&self, table: &SessionTable, data: &str) -> Result<Option<i64>> {
        let span = span!(Level::TRACE, "insert", table = %table.table);

        Self::insert_data_impl(self, table, data)
            .instrument(span)
            .await
    }

    async fn insert_data_impl(&self, table: &SessionTable, data: &str) -> Result<Option<i64>> {
        let mut statement = Query::insert();
        statement
            .into_table(table.table_iden())
            .columns([table.data_iden()])
            .values([data.into()])?;

        let id = if self.supports_returning() {
            statement.returning_col(table.id_iden());
            self.fetch_id(&statement).await?
        } else {
            self.execute_statement(&statement)
                .await?
                .last_inserted_row_id()
        };

        trace!(?id, "Inserted row");
        Ok(id)
    }

    /// Replaces the encoded values stored under `id`.
    ///
    /// # Errors
    ///
    /// This method can return an error if the statement fails.
    pub async fn update_data(
        &self,
        table: &SessionTable,
        id: i64,
        data: &str,
    ) -> Result<StatementResult> {
        let span = span!(Level::TRACE, "update", table = %table.table, id);

        let statement = Query::update()
            .table(table.table_iden())
            .value(table.data_iden(), data)
            .and_where(Expr::col(table.id_iden()).eq(id))
            .to_owned();

        self.execute_statement(&statement).instrument(span).await
    }

    /// Deletes the row stored under `id`.
    ///
    /// # Errors
    ///
    /// This method can return an error if the statement fails.
    pub async fn delete_data(&self, table: &SessionTable, id: i64) -> Result<StatementResult> {
        let span = span!(Level::TRACE, "delete", table = %table.table, id);

        let statement = Query::delete()
            .from_table(table.table_iden())
            .and_where(Expr::col(table.id_iden()).eq(id))
            .to_owned();

        self.execute_statement(&statement).instrument(span).await
    }

    /// Executes a raw SQL query.
    ///
    /// # Errors
    ///
    /// This method can return an error if the query is invalid.
    ///
    /// Can return an error if the database connection is lost.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlstore::db::Database;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> sqlstore::db::Result<()> {
    /// let db = Database::new("sqlite::memory:").await?;
    /// db.raw("CREATE TABLE test (id INTEGER PRIMARY KEY AUTOINCREMENT, data TEXT)")
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn raw(&self, query: &str) -> Result<StatementResult> {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            DatabaseImpl::Sqlite(inner) => inner.raw(query).await,
            #[cfg(feature = "postgres")]
            DatabaseImpl::Postgres(inner) => inner.raw(query).await,
            #[cfg(feature = "mysql")]
            DatabaseImpl::MySql(inner) => inner.raw(query).await,
        }
    }

    fn supports_returning(&self) -> bool {
        match self.inner {
            #[cfg(feature = "sqlite")]
            DatabaseImpl::Sqlite(_) => true,
            #[cfg(feature = "postgres")]
            DatabaseImpl::Postgres(_) => true,
            #[cfg(feature = "mysql")]
            DatabaseImpl::MySql(_) => false,
        }
    }

    fn id_column_type(&self) -> sea_query::ColumnType {
        match self.inner {
            #[cfg(feature = "sqlite")]
            DatabaseImpl::Sqlite(_) => DatabaseSqlite::id_column_type(),
            #[cfg(feature = "postgres")]
            DatabaseImpl::Postgres(_) => DatabasePostgres::id_column_type(),
            #[cfg(feature = "mysql")]
            DatabaseImpl::MySql(_) => DatabaseMySql::id_column_type(),
        }
    }

    async fn fetch_string<S>(&self, statement: &S) -> Result<Option<String>>
    where
        S: SqlxBinder + Send + Sync,
    {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            DatabaseImpl::Sqlite(inner) => inner.fetch_column(statement).await,
            #[cfg(feature = "postgres")]
            DatabaseImpl::Postgres(inner) => inner.fetch_column(statement).await,
            #[cfg(feature = "mysql")]
            DatabaseImpl::MySql(inner) => inner.fetch_column(statement).await,
        }
    }

    async fn fetch_id<S>(&self, statement: &S) -> Result<Option<i64>>
    where
        S: SqlxBinder + Send + Sync,
    {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            DatabaseImpl::Sqlite(inner) => inner.fetch_column(statement).await,
            #[cfg(feature = "postgres")]
            DatabaseImpl::Postgres(inner) => inner.fetch_column(statement).await,
            #[cfg(feature = "mysql")]
            DatabaseImpl::MySql(inner) => inner.fetch_column(statement).await,
        }
    }

    async fn execute_statement<S>(&self, statement: &S) -> Result<StatementResult>
    where
        S: SqlxBinder + Send + Sync,
    {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            DatabaseImpl::Sqlite(inner) => inner.execute_statement(statement).await,
            #[cfg(feature = "postgres")]
            DatabaseImpl::Postgres(inner) => inner.execute_statement(statement).await,
            #[cfg(feature = "mysql")]
            DatabaseImpl::MySql(inner) => inner.execute_statement(statement).await,
        }
    }

    async fn execute_schema<S: SchemaStatementBuilder>(
        &self,
        statement: S,
    ) -> Result<StatementResult> {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            DatabaseImpl::Sqlite(inner) => inner.execute_schema(statement).await,
            #[cfg(feature = "postgres")]
            DatabaseImpl::Postgres(inner) => inner.execute_schema(statement).await,
            #[cfg(feature = "mysql")]
            DatabaseImpl::MySql(inner) => inner.execute_schema(statement).await,
        }
    }
}

/// Result of a statement execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StatementResult {
    rows_affected: u64,
    last_inserted_row_id: Option<i64>,
}

impl StatementResult {
    /// Returns the number of rows affected by the query.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Returns the ID of the last inserted row, if the engine reports one.
    #[must_use]
    pub fn last_inserted_row_id(&self) -> Option<i64> {
        self.last_inserted_row_id
    }
}
