use bytes::Bytes;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{DatasetAnnotation, DatasetMetadata};
use crate::config::ServiceConfig;
use crate::database::DatabaseManager;
use crate::error::AnalysisError;
use crate::identifiers::{allowed_file, stored_upload_path, validate_table_name};
use crate::ingest::infer_table;
use crate::storage::{TableStore, UploadStore};

/// One uploaded file plus the annotation the user gave it.
#[derive(Debug, Clone)]
pub struct DatasetUpload {
    pub table_name: String,
    pub display_name: String,
    pub description: String,
    pub original_filename: String,
    pub owner: String,
    pub content: Bytes,
}

/// Owns the table store, the raw uploads and the catalog, and keeps the three
/// in step for ingestion and dataset management.
#[derive(Clone)]
pub struct DatasetManager {
    tables: TableStore,
    uploads: UploadStore,
    database: DatabaseManager,
}

impl DatasetManager {
    pub async fn new(config: &ServiceConfig) -> Result<Self, AnalysisError> {
        info!("Using catalog database at {}", config.database_url);

        let tables = TableStore::new(&config.data_dir)?;
        let uploads = UploadStore::new(&config.upload_dir)?;
        let database = DatabaseManager::new(&config.database_url).await?;

        Ok(Self {
            tables,
            uploads,
            database,
        })
    }

    pub fn tables(&self) -> &TableStore {
        &self.tables
    }

    /// Turns an upload into a physical table plus a catalog entry.
    ///
    /// The physical table is written before the catalog row. If the catalog
    /// write fails afterwards the table stays behind and shows up in
    /// [`DatasetManager::find_orphan_tables`].
    pub async fn ingest(&self, upload: DatasetUpload) -> Result<DatasetMetadata, AnalysisError> {
        let table_name = upload.table_name.clone();
        info!(
            "Ingesting '{}' as table '{}' for {}",
            upload.original_filename, table_name, upload.owner
        );

        match self.ingest_upload(upload).await {
            Ok(entry) => {
                info!(
                    "Dataset {} ready: table '{}' with {} rows, {} columns",
                    entry.id, entry.table_name, entry.row_count, entry.column_count
                );
                Ok(entry)
            }
            Err(e) if e.is_validation() => {
                warn!("Rejected upload for table '{}': {}", table_name, e);
                Err(e)
            }
            Err(e) => {
                error!("Ingestion of table '{}' failed: {}", table_name, e);
                Err(e)
            }
        }
    }

    async fn ingest_upload(&self, upload: DatasetUpload) -> Result<DatasetMetadata, AnalysisError> {
        let table_name = validate_table_name(upload.table_name.trim())?.to_string();

        if self.database.find_by_table_name(&table_name).await?.is_some() {
            return Err(AnalysisError::DuplicateTable { table_name });
        }

        if !allowed_file(&upload.original_filename) {
            return Err(AnalysisError::UnsupportedFileType {
                filename: upload.original_filename,
            });
        }

        let dataset_id = format!("ds_{}", Uuid::new_v4().simple());
        let relative_path = stored_upload_path(
            &upload.owner,
            &table_name,
            &dataset_id,
            &upload.original_filename,
        );
        let stored_file_path = self
            .uploads
            .save(&relative_path, upload.content.clone())
            .await?;

        let inferred = infer_table(&upload.content)?;
        let batch = inferred.to_record_batch()?;
        info!(
            "Parsed '{}' with {} delimiter: {} rows, {} columns",
            upload.original_filename,
            inferred.delimiter,
            inferred.row_count,
            inferred.column_count()
        );

        self.tables.create_table(&table_name, &batch).await?;

        let now = Utc::now();
        let display_name = match upload.display_name.trim() {
            "" => table_name.clone(),
            name => name.to_string(),
        };
        let entry = DatasetMetadata {
            id: dataset_id,
            table_name: table_name.clone(),
            display_name,
            description: upload.description.trim().to_string(),
            column_types: inferred.column_types_summary(),
            row_count: inferred.row_count as i64,
            column_count: inferred.column_count() as i32,
            original_filename: upload.original_filename,
            stored_file_path,
            owner: upload.owner,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.database.add_dataset(&entry).await {
            error!(
                "Table '{}' was written but its catalog entry was not; it is now orphaned",
                table_name
            );
            return Err(match e {
                AnalysisError::CatalogWrite { .. } => e,
                other => AnalysisError::CatalogWrite {
                    message: other.to_string(),
                },
            });
        }

        Ok(entry)
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetMetadata>, AnalysisError> {
        self.database.list_datasets().await
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Result<DatasetMetadata, AnalysisError> {
        self.database
            .get_dataset(dataset_id)
            .await?
            .ok_or_else(|| AnalysisError::DatasetNotFound {
                dataset_id: dataset_id.to_string(),
            })
    }

    /// Missing and foreign datasets are indistinguishable to the caller.
    async fn owned_dataset(
        &self,
        dataset_id: &str,
        actor: &str,
    ) -> Result<DatasetMetadata, AnalysisError> {
        match self.database.get_dataset(dataset_id).await? {
            Some(entry) if entry.is_owned_by(actor) => Ok(entry),
            _ => {
                warn!("{} may not modify dataset {}", actor, dataset_id);
                Err(AnalysisError::PermissionDenied {
                    dataset_id: dataset_id.to_string(),
                })
            }
        }
    }

    pub async fn update_dataset(
        &self,
        dataset_id: &str,
        actor: &str,
        annotation: DatasetAnnotation,
    ) -> Result<DatasetMetadata, AnalysisError> {
        let entry = self.owned_dataset(dataset_id, actor).await?;

        let annotation = DatasetAnnotation {
            display_name: annotation.display_name.map(|name| match name.trim() {
                "" => entry.table_name.clone(),
                name => name.to_string(),
            }),
            description: annotation.description.map(|d| d.trim().to_string()),
        };
        if annotation.is_empty() {
            return Ok(entry);
        }

        self.database.update_dataset(dataset_id, &annotation).await?;
        info!("Updated annotation of dataset {}", dataset_id);

        self.get_dataset(dataset_id).await
    }

    /// Removes the catalog row, then the physical table, then the raw upload.
    /// Only the upload removal is best effort.
    pub async fn delete_dataset(&self, dataset_id: &str, actor: &str) -> Result<(), AnalysisError> {
        let entry = self.owned_dataset(dataset_id, actor).await?;

        self.database.delete_dataset(dataset_id).await?;

        if let Err(e) = self.tables.drop_table(&entry.table_name).await {
            error!(
                "Catalog entry {} removed but table '{}' could not be dropped: {}",
                dataset_id, entry.table_name, e
            );
            return Err(match e {
                AnalysisError::StorageWrite { .. } => e,
                other => AnalysisError::StorageWrite {
                    message: other.to_string(),
                },
            });
        }

        if let Err(e) = self.uploads.remove(&entry.stored_file_path).await {
            warn!(
                "Could not remove raw upload {}: {}",
                entry.stored_file_path, e
            );
        }

        info!("Deleted dataset {} (table '{}')", dataset_id, entry.table_name);
        Ok(())
    }

    /// Original filename and bytes of the raw upload.
    pub async fn download_dataset(&self, dataset_id: &str) -> Result<(String, Bytes), AnalysisError> {
        let entry = self.get_dataset(dataset_id).await?;
        let content = self.uploads.read(&entry.stored_file_path).await?;
        Ok((entry.original_filename, content))
    }

    /// Physical tables that no catalog entry points at. Nothing is removed.
    pub async fn find_orphan_tables(&self) -> Result<Vec<String>, AnalysisError> {
        let catalogued: HashSet<String> = self
            .database
            .list_datasets()
            .await?
            .into_iter()
            .map(|entry| entry.table_name)
            .collect();

        let orphans: Vec<String> = self
            .tables
            .list_tables()
            .await?
            .into_iter()
            .filter(|name| !catalogued.contains(name))
            .collect();

        if !orphans.is_empty() {
            warn!("Found {} orphaned tables: {:?}", orphans.len(), orphans);
        }
        Ok(orphans)
    }
}
