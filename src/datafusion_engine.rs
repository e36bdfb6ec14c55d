use datafusion::execution::config::SessionConfig;
use datafusion::execution::context::{SQLOptions, SessionContext};
use datafusion::prelude::ParquetReadOptions;
use tracing::{info, warn};

use crate::domain::QueryResultSet;
use crate::error::AnalysisError;
use crate::storage::TableStore;

/// Runs SQL over every table in the shared store.
///
/// A new session is built for each query and every stored table is registered
/// under its own name, so results always reflect what is on disk right now.
pub struct DataFusionEngine {
    tables: TableStore,
}

impl DataFusionEngine {
    pub fn new(tables: TableStore) -> Self {
        Self { tables }
    }

    async fn session(&self) -> Result<SessionContext, AnalysisError> {
        let config = SessionConfig::new().with_information_schema(true);
        let ctx = SessionContext::new_with_config(config);

        for table_name in self.tables.list_tables().await? {
            let path = self.tables.table_file(&table_name);
            let path = path.to_string_lossy().into_owned();
            if let Err(e) = ctx
                .register_parquet(table_name.as_str(), &path, ParquetReadOptions::default())
                .await
            {
                warn!("Skipping unreadable table '{}': {}", table_name, e);
            }
        }

        Ok(ctx)
    }

    /// Executes a read-only query. Any user may read any table; DDL, DML and
    /// session statements are rejected because the session is discarded after
    /// the query and nothing they did would persist.
    pub async fn execute_sql(&self, sql: &str) -> Result<QueryResultSet, AnalysisError> {
        let start_time = std::time::Instant::now();
        info!("Executing query: {}", sql);

        let ctx = self.session().await?;

        let options = SQLOptions::new()
            .with_allow_ddl(false)
            .with_allow_dml(false)
            .with_allow_statements(false);

        let df = ctx
            .sql_with_options(sql, options)
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("not supported:") {
                    AnalysisError::InvalidSqlQuery {
                        message: format!("only read-only queries can be run ({})", message),
                    }
                } else {
                    AnalysisError::InvalidSqlQuery { message }
                }
            })?;

        let schema = df.schema().inner().clone();

        let batches = df
            .collect()
            .await
            .map_err(|e| AnalysisError::QueryExecutionFailed {
                message: e.to_string(),
            })?;

        let result = QueryResultSet { schema, batches };
        info!(
            "Query completed with {} rows in {}ms",
            result.row_count(),
            start_time.elapsed().as_millis()
        );

        Ok(result)
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        let ctx = self.session().await?;
        let _ = ctx.sql("SELECT 1 as health_check").await?.collect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::infer_table;

    async fn engine_with(tables: &[(&str, &[u8])]) -> (tempfile::TempDir, DataFusionEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path()).unwrap();
        for (name, content) in tables {
            let batch = infer_table(content).unwrap().to_record_batch().unwrap();
            store.create_table(name, &batch).await.unwrap();
        }
        (dir, DataFusionEngine::new(store))
    }

    #[tokio::test]
    async fn queries_see_every_stored_table() {
        let (_dir, engine) = engine_with(&[
            ("cities", b"id,city\n1,paris\n2,rome\n"),
            ("visits", b"city_id,visitors\n1,10\n1,5\n2,7\n"),
        ])
        .await;

        let result = engine
            .execute_sql(
                "SELECT c.city, SUM(v.visitors) AS total FROM cities c \
                 JOIN visits v ON v.city_id = c.id GROUP BY c.city ORDER BY c.city",
            )
            .await
            .unwrap();

        assert_eq!(result.column_names(), vec!["city", "total"]);
        assert_eq!(result.row_count(), 2);
    }

    #[tokio::test]
    async fn unknown_table_is_an_invalid_query() {
        let (_dir, engine) = engine_with(&[]).await;

        let err = engine.execute_sql("SELECT * FROM missing").await.unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSqlQuery { .. }));
    }

    #[tokio::test]
    async fn tables_written_after_construction_are_visible() {
        let (dir, engine) = engine_with(&[]).await;
        let store = TableStore::new(dir.path()).unwrap();
        let batch = infer_table(b"x\n1\n").unwrap().to_record_batch().unwrap();
        store.create_table("late", &batch).await.unwrap();

        let result = engine.execute_sql("SELECT x FROM late").await.unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test]
    async fn mutating_statements_are_rejected_and_change_nothing() {
        let (_dir, engine) = engine_with(&[("sales", b"region,amount\nnorth,10\n")]).await;

        for sql in [
            "DROP TABLE sales",
            "CREATE TABLE sales_copy AS SELECT * FROM sales",
            "CREATE VIEW sales_view AS SELECT region FROM sales",
            "SET datafusion.execution.batch_size = 1",
        ] {
            let err = engine.execute_sql(sql).await.unwrap_err();
            assert!(
                err.to_string().contains("only read-only queries"),
                "{}: {}",
                sql,
                err
            );
        }

        let result = engine.execute_sql("SELECT * FROM sales").await.unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test]
    async fn health_check_runs_a_trivial_query() {
        let (_dir, engine) = engine_with(&[]).await;
        engine.health_check().await.unwrap();
    }
}
