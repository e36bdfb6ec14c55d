use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::DatasetMetadata;
use crate::config::ServiceConfig;
use crate::datafusion_engine::DataFusionEngine;
use crate::dataset_manager::{DatasetManager, DatasetUpload};
use crate::domain::{OutputFormat, QueryMode, QueryOutcome, QueryRequest, QueryResponse};
use crate::error::AnalysisError;
use crate::llm::{extract_sql, ChatCompletionsClient, SqlGenerator};

pub struct AnalysisEngine {
    datafusion: DataFusionEngine,
    dataset_manager: DatasetManager,
    sql_generator: Arc<dyn SqlGenerator>,
}

impl AnalysisEngine {
    pub async fn new(config: &ServiceConfig) -> Result<Self, AnalysisError> {
        info!(
            "Language model '{}' at {} (API key {})",
            config.llm.model,
            config.llm.base_url,
            if config.llm.api_key.is_some() { "set" } else { "not set" }
        );
        let sql_generator = Arc::new(ChatCompletionsClient::new(config.llm.clone())?);
        Self::with_sql_generator(config, sql_generator).await
    }

    pub async fn with_sql_generator(
        config: &ServiceConfig,
        sql_generator: Arc<dyn SqlGenerator>,
    ) -> Result<Self, AnalysisError> {
        info!("Initializing Analysis Engine");

        let dataset_manager = DatasetManager::new(config).await?;
        let datafusion = DataFusionEngine::new(dataset_manager.tables().clone());

        info!("Analysis Engine initialized successfully");

        Ok(Self {
            datafusion,
            dataset_manager,
            sql_generator,
        })
    }

    /// Catalog and management operations.
    pub fn datasets(&self) -> &DatasetManager {
        &self.dataset_manager
    }

    pub async fn ingest_dataset(
        &self,
        upload: DatasetUpload,
    ) -> Result<DatasetMetadata, AnalysisError> {
        self.dataset_manager.ingest(upload).await
    }

    /// One block per catalog entry, separated by blank lines.
    pub async fn build_schema_context(&self) -> Result<String, AnalysisError> {
        let datasets = self.dataset_manager.list_datasets().await?;
        if datasets.is_empty() {
            return Err(AnalysisError::NoDatasetsAvailable);
        }

        Ok(datasets
            .iter()
            .map(DatasetMetadata::schema_block)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Returns the SQL to run and, in natural-language mode, the same SQL as
    /// the generated statement to echo back.
    async fn resolve_sql(
        &self,
        request: &QueryRequest,
    ) -> Result<(String, Option<String>), AnalysisError> {
        let input = request.input.trim();

        match request.mode {
            QueryMode::LiteralSql => {
                if input.is_empty() {
                    return Err(AnalysisError::InvalidSqlQuery {
                        message: "SQL query is required".to_string(),
                    });
                }
                Ok((input.to_string(), None))
            }
            QueryMode::NaturalLanguage => {
                if input.is_empty() {
                    return Err(AnalysisError::InvalidSqlQuery {
                        message: "A question is required".to_string(),
                    });
                }

                let schema_context = self.build_schema_context().await?;
                let raw = self
                    .sql_generator
                    .generate_sql(input, &schema_context)
                    .await?;

                let sql = extract_sql(&raw);
                if sql.is_empty() {
                    return Err(AnalysisError::LlmError {
                        message: "model returned no SQL".to_string(),
                    });
                }

                info!("Generated SQL: {}", sql);
                Ok((sql.clone(), Some(sql)))
            }
        }
    }

    async fn execute(
        &self,
        sql: String,
        generated_sql: Option<String>,
        format: OutputFormat,
    ) -> Result<QueryOutcome, AnalysisError> {
        let result = self.datafusion.execute_sql(&sql).await?;
        let body = result.render(format)?;
        debug!("Serialized {} rows as {}", result.row_count(), format);

        Ok(QueryOutcome {
            sql,
            generated_sql,
            format,
            row_count: result.row_count(),
            body,
        })
    }

    pub async fn run_query(&self, request: &QueryRequest) -> Result<QueryOutcome, AnalysisError> {
        let (sql, generated_sql) = self.resolve_sql(request).await?;
        self.execute(sql, generated_sql, request.format).await
    }

    /// Request boundary: every failure becomes the response's `error` string.
    pub async fn handle_query(&self, request: QueryRequest) -> QueryResponse {
        info!("Handling {} query, {} output", request.mode, request.format);

        let (sql, generated_sql) = match self.resolve_sql(&request).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Query failed before execution: {}", e);
                return QueryResponse::failed(&e, None);
            }
        };

        match self.execute(sql, generated_sql.clone(), request.format).await {
            Ok(outcome) => QueryResponse::succeeded(outcome),
            Err(e) => {
                warn!("Query failed: {}", e);
                QueryResponse::failed(&e, generated_sql)
            }
        }
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        self.dataset_manager.list_datasets().await?;
        self.datafusion.health_check().await
    }
}
