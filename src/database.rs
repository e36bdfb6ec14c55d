use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::result::{ConnectionError, ConnectionResult, DatabaseErrorKind};
use diesel::sqlite::SqliteConnection;
use diesel_async::{
    pooled_connection::{
        deadpool::{Object, Pool},
        AsyncDieselConnectionManager, ManagerConfig,
    },
    sync_connection_wrapper::SyncConnectionWrapper,
    AsyncConnection, RunQueryDsl, SimpleAsyncConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use futures::future::{BoxFuture, FutureExt};
use std::path::Path;
use tracing::info;

use crate::catalog::{DatasetAnnotation, DatasetMetadata};
use crate::error::AnalysisError;
use crate::models::*;
use crate::schema::datasets;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

type CatalogConnection = SyncConnectionWrapper<SqliteConnection>;

/// Applied to every connection. Concurrent ingestions wait on the write lock
/// instead of failing with `database is locked`.
const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;";

fn establish_connection(database_url: &str) -> BoxFuture<'_, ConnectionResult<CatalogConnection>> {
    async move {
        let mut conn = CatalogConnection::establish(database_url).await?;
        conn.batch_execute(CONNECTION_PRAGMAS)
            .await
            .map_err(ConnectionError::CouldntSetupConfiguration)?;
        Ok(conn)
    }
    .boxed()
}

/// The metadata catalog. Every call checks out a pooled connection and reads
/// current state; nothing is cached in process.
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<CatalogConnection>,
}

impl DatabaseManager {
    pub async fn new(database_url: &str) -> Result<Self, AnalysisError> {
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup = Box::new(establish_connection);
        let config = AsyncDieselConnectionManager::<CatalogConnection>::new_with_config(
            database_url,
            manager_config,
        );
        let pool = Pool::builder(config)
            .build()
            .map_err(|e| AnalysisError::ConfigError {
                message: format!("Failed to create database pool: {}", e),
            })?;

        let manager = Self { pool };
        manager.run_migrations(database_url)?;

        Ok(manager)
    }

    pub fn run_migrations(&self, database_url: &str) -> Result<(), AnalysisError> {
        // diesel_migrations only drives synchronous connections.
        let mut connection =
            SqliteConnection::establish(database_url).map_err(|e| AnalysisError::ConfigError {
                message: format!("Failed to establish connection for migrations: {}", e),
            })?;

        connection
            .batch_execute(CONNECTION_PRAGMAS)
            .map_err(|e| AnalysisError::ConfigError {
                message: format!("Failed to configure catalog database: {}", e),
            })?;

        connection
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| AnalysisError::ConfigError {
                message: format!("Failed to run migrations: {}", e),
            })?;

        Ok(())
    }

    async fn connection(&self) -> Result<Object<CatalogConnection>, AnalysisError> {
        self.pool
            .get()
            .await
            .map_err(|e| AnalysisError::DatabaseError {
                message: format!("Failed to get database connection: {}", e),
            })
    }

    pub async fn add_dataset(&self, entry: &DatasetMetadata) -> Result<(), AnalysisError> {
        info!("Adding dataset {} ({}) to catalog", entry.id, entry.table_name);
        let mut conn = self.connection().await?;
        let new_dataset = NewDataset::from(entry);

        conn.transaction::<_, AnalysisError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(datasets::table)
                    .values(&new_dataset)
                    .execute(conn)
                    .await
                    .map_err(|e| match e {
                        diesel::result::Error::DatabaseError(
                            DatabaseErrorKind::UniqueViolation,
                            _,
                        ) => AnalysisError::DuplicateTable {
                            table_name: new_dataset.table_name.to_string(),
                        },
                        other => AnalysisError::CatalogWrite {
                            message: format!("Failed to insert dataset: {}", other),
                        },
                    })?;
                Ok(())
            })
        })
        .await
    }

    pub async fn get_dataset(
        &self,
        dataset_id: &str,
    ) -> Result<Option<DatasetMetadata>, AnalysisError> {
        let mut conn = self.connection().await?;

        let dataset = datasets::table
            .filter(datasets::id.eq(dataset_id))
            .get_result::<Dataset>(&mut conn)
            .await
            .optional()
            .map_err(|e| AnalysisError::DatabaseError {
                message: format!("Failed to fetch dataset: {}", e),
            })?;

        Ok(dataset.map(|d| d.into()))
    }

    pub async fn find_by_table_name(
        &self,
        name: &str,
    ) -> Result<Option<DatasetMetadata>, AnalysisError> {
        let mut conn = self.connection().await?;

        let dataset = datasets::table
            .filter(datasets::table_name.eq(name))
            .get_result::<Dataset>(&mut conn)
            .await
            .optional()
            .map_err(|e| AnalysisError::DatabaseError {
                message: format!("Failed to fetch dataset by table name: {}", e),
            })?;

        Ok(dataset.map(|d| d.into()))
    }

    /// Newest first.
    pub async fn list_datasets(&self) -> Result<Vec<DatasetMetadata>, AnalysisError> {
        let mut conn = self.connection().await?;

        let dataset_list = datasets::table
            .order((datasets::created_at.desc(), datasets::table_name.asc()))
            .get_results::<Dataset>(&mut conn)
            .await
            .map_err(|e| AnalysisError::DatabaseError {
                message: format!("Failed to fetch datasets: {}", e),
            })?;

        Ok(dataset_list.into_iter().map(|d| d.into()).collect())
    }

    pub async fn update_dataset(
        &self,
        dataset_id: &str,
        annotation: &DatasetAnnotation,
    ) -> Result<usize, AnalysisError> {
        let mut conn = self.connection().await?;

        let changes = DatasetChanges {
            display_name: annotation.display_name.as_deref(),
            description: annotation.description.as_deref(),
            updated_at: Utc::now().naive_utc(),
        };

        diesel::update(datasets::table.filter(datasets::id.eq(dataset_id)))
            .set(&changes)
            .execute(&mut conn)
            .await
            .map_err(|e| AnalysisError::CatalogWrite {
                message: format!("Failed to update dataset {}: {}", dataset_id, e),
            })
    }

    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<usize, AnalysisError> {
        info!("Removing dataset {} from catalog", dataset_id);
        let mut conn = self.connection().await?;

        diesel::delete(datasets::table.filter(datasets::id.eq(dataset_id)))
            .execute(&mut conn)
            .await
            .map_err(|e| AnalysisError::CatalogWrite {
                message: format!("Failed to delete dataset {}: {}", dataset_id, e),
            })
    }
}
