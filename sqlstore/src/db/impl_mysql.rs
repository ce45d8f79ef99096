//! Database interface implementation – MySQL backend.

use crate::db::sea_query_db::impl_sea_query_db_backend;

impl_sea_query_db_backend!(DatabaseMySql: sqlx::mysql::MySql, sqlx::mysql::MySqlPool, sea_query::MysqlQueryBuilder);

impl DatabaseMySql {
    fn last_inserted_row_id_for(result: &sqlx::mysql::MySqlQueryResult) -> Option<i64> {
        i64::try_from(result.last_insert_id()).ok()
    }

    pub(super) fn id_column_type() -> sea_query::ColumnType {
        sea_query::ColumnType::BigInteger
    }
}
