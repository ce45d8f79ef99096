/// Implements the database connection for a specific engine using `SeaQuery`.
///
/// Note that this macro doesn't implement certain engine-specific items, and
/// they need to be implemented in a separate `impl` block. These are:
/// * `last_inserted_row_id_for`
/// * `id_column_type`
macro_rules! impl_sea_query_db_backend {
    ($db_name:ident : $sqlx_db_ty:ty, $pool_ty:ty, $query_builder:expr) => {
        /// A wrapper over the connection pool of one database engine that
        /// serves as an internal implementation of `Database` using `SeaQuery`.
        #[derive(Debug)]
        pub(super) struct $db_name {
            db_connection: $pool_ty,
        }

        impl $db_name {
            pub(super) async fn new(url: &str) -> crate::db::Result<Self> {
                let db_connection = <$pool_ty>::connect(url).await?;

                Ok(Self { db_connection })
            }

            pub(super) async fn close(&self) -> crate::db::Result<()> {
                self.db_connection.close().await;
                Ok(())
            }

            pub(super) async fn fetch_column<T, S>(
                &self,
                statement: &S,
            ) -> crate::db::Result<Option<T>>
            where
                S: sea_query_binder::SqlxBinder,
                T: for<'r> sqlx::Decode<'r, $sqlx_db_ty> + sqlx::Type<$sqlx_db_ty> + Send + Unpin,
            {
                use sqlx::Row;

                let (sql, values) = Self::build_sql(statement);

                let row = Self::sqlx_query_with(&sql, values)
                    .fetch_optional(&self.db_connection)
                    .await?;
                let value: Option<T> = row.map(|row| row.try_get(0)).transpose()?;
                Ok(value)
            }

            pub(super) async fn execute_statement<S: sea_query_binder::SqlxBinder>(
                &self,
                statement: &S,
            ) -> crate::db::Result<crate::db::StatementResult> {
                let (sql, values) = Self::build_sql(statement);

                self.execute_sqlx(Self::sqlx_query_with(&sql, values)).await
            }

            pub(super) async fn execute_schema<S: sea_query::SchemaStatementBuilder>(
                &self,
                statement: S,
            ) -> crate::db::Result<crate::db::StatementResult> {
                let sql = statement.build($query_builder);
                tracing::debug!("Schema modification: {}", sql);

                self.execute_sqlx(sqlx::query(&sql)).await
            }

            pub(super) async fn raw(
                &self,
                sql: &str,
            ) -> crate::db::Result<crate::db::StatementResult> {
                tracing::debug!("Raw query: `{}`", sql);

                self.execute_sqlx(sqlx::query(sql)).await
            }

            async fn execute_sqlx<'a, A>(
                &self,
                sqlx_statement: sqlx::query::Query<'a, $sqlx_db_ty, A>,
            ) -> crate::db::Result<crate::db::StatementResult>
            where
                A: 'a + sqlx::IntoArguments<'a, $sqlx_db_ty>,
            {
                let result = sqlx_statement.execute(&self.db_connection).await?;
                let result = crate::db::StatementResult {
                    rows_affected: result.rows_affected(),
                    last_inserted_row_id: Self::last_inserted_row_id_for(&result),
                };

                tracing::debug!("Rows affected: {}", result.rows_affected);
                Ok(result)
            }

            fn build_sql<S>(statement: &S) -> (String, sea_query_binder::SqlxValues)
            where
                S: sea_query_binder::SqlxBinder,
            {
                statement.build_sqlx($query_builder)
            }

            fn sqlx_query_with(
                sql: &str,
                values: sea_query_binder::SqlxValues,
            ) -> sqlx::query::Query<'_, $sqlx_db_ty, sea_query_binder::SqlxValues> {
                tracing::debug!("Query: `{}` (values: {:?})", sql, values);

                sqlx::query_with(sql, values)
            }
        }
    };
}

pub(super) use impl_sea_query_db_backend;
