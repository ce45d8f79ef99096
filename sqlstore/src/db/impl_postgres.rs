//! Database interface implementation – PostgreSQL backend.

use crate::db::sea_query_db::impl_sea_query_db_backend;

impl_sea_query_db_backend!(DatabasePostgres: sqlx::postgres::Postgres, sqlx::postgres::PgPool, sea_query::PostgresQueryBuilder);

impl DatabasePostgres {
    fn last_inserted_row_id_for(_result: &sqlx::postgres::PgQueryResult) -> Option<i64> {
        None
    }

    /// Rendered as `bigserial`, so that the identifiers decode as `i64`.
    pub(super) fn id_column_type() -> sea_query::ColumnType {
        sea_query::ColumnType::BigInteger
    }
}
