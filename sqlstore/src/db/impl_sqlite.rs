//! Database interface implementation – SQLite backend.

use crate::db::sea_query_db::impl_sea_query_db_backend;

impl_sea_query_db_backend!(DatabaseSqlite: sqlx::sqlite::Sqlite, sqlx::sqlite::SqlitePool, sea_query::SqliteQueryBuilder);

impl DatabaseSqlite {
    #[expect(clippy::unnecessary_wraps)] // to have a unified interface between database impls
    fn last_inserted_row_id_for(result: &sqlx::sqlite::SqliteQueryResult) -> Option<i64> {
        Some(result.last_insert_rowid())
    }

    /// `AUTOINCREMENT` is only accepted on an `INTEGER PRIMARY KEY` column.
    pub(super) fn id_column_type() -> sea_query::ColumnType {
        sea_query::ColumnType::Integer
    }
}
