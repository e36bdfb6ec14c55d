use bytes::Bytes;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::parquet::arrow::ArrowWriter;
use futures::StreamExt;
use object_store::local::LocalFileSystem;
use object_store::{path::Path as ObjectPath, ObjectStore, PutMode, PutOptions, PutPayload};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AnalysisError;
use crate::identifiers::validate_table_name;

const TABLES_PREFIX: &str = "tables";
const TABLE_EXTENSION: &str = ".parquet";

fn local_store(root: &Path) -> Result<Arc<dyn ObjectStore>, AnalysisError> {
    std::fs::create_dir_all(root)?;
    let store = LocalFileSystem::new_with_prefix(root).map_err(|e| AnalysisError::ConfigError {
        message: format!("Failed to open storage at {}: {}", root.display(), e),
    })?;
    Ok(Arc::new(store))
}

/// The shared table store: one Parquet file per physical table.
#[derive(Debug, Clone)]
pub struct TableStore {
    store: Arc<dyn ObjectStore>,
    root: PathBuf,
}

impl TableStore {
    pub fn new(data_dir: &Path) -> Result<Self, AnalysisError> {
        info!("Initializing table store at {}", data_dir.display());

        std::fs::create_dir_all(data_dir.join(TABLES_PREFIX))?;
        let store = local_store(data_dir)?;
        let root = data_dir.canonicalize()?;

        Ok(Self { store, root })
    }

    fn object_path(table_name: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}{}", TABLES_PREFIX, table_name, TABLE_EXTENSION))
    }

    /// Absolute path of the table file, for registering with the SQL engine.
    pub fn table_file(&self, table_name: &str) -> PathBuf {
        self.root
            .join(TABLES_PREFIX)
            .join(format!("{}{}", table_name, TABLE_EXTENSION))
    }

    /// Writes a new table. Fails with `TableAlreadyExists` if a table of that
    /// name is already stored; existing data is never replaced.
    pub async fn create_table(
        &self,
        table_name: &str,
        batch: &RecordBatch,
    ) -> Result<usize, AnalysisError> {
        validate_table_name(table_name)?;

        let mut buffer = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)?;
            writer.write(batch)?;
            writer.close()?;
        }
        let size = buffer.len();

        let options = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };

        match self
            .store
            .put_opts(&Self::object_path(table_name), PutPayload::from(buffer), options)
            .await
        {
            Ok(_) => {
                info!(
                    "Created table '{}' with {} rows ({} bytes)",
                    table_name,
                    batch.num_rows(),
                    size
                );
                Ok(size)
            }
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(AnalysisError::TableAlreadyExists {
                    table_name: table_name.to_string(),
                })
            }
            Err(e) => Err(AnalysisError::StorageWrite {
                message: format!("Failed to write table '{}': {}", table_name, e),
            }),
        }
    }

    /// Names of every physical table, sorted.
    pub async fn list_tables(&self) -> Result<Vec<String>, AnalysisError> {
        let prefix = ObjectPath::from(TABLES_PREFIX);
        let mut stream = self.store.list(Some(&prefix));
        let mut tables = Vec::new();

        while let Some(result) = stream.next().await {
            let meta = result?;
            let Some(filename) = meta.location.filename() else {
                continue;
            };
            let Some(name) = filename.strip_suffix(TABLE_EXTENSION) else {
                continue;
            };
            if validate_table_name(name).is_ok() {
                tables.push(name.to_string());
            } else {
                warn!("Ignoring unexpected file in table store: {}", meta.location);
            }
        }

        tables.sort();
        Ok(tables)
    }

    pub async fn table_exists(&self, table_name: &str) -> Result<bool, AnalysisError> {
        match self.store.head(&Self::object_path(table_name)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn drop_table(&self, table_name: &str) -> Result<(), AnalysisError> {
        validate_table_name(table_name)?;

        match self.store.delete(&Self::object_path(table_name)).await {
            Ok(()) => {
                info!("Dropped table '{}'", table_name);
                Ok(())
            }
            Err(object_store::Error::NotFound { .. }) => {
                warn!("Table '{}' was already absent from the store", table_name);
                Ok(())
            }
            Err(e) => Err(AnalysisError::StorageWrite {
                message: format!("Failed to drop table '{}': {}", table_name, e),
            }),
        }
    }
}

/// Raw uploaded files, kept for download-as-attachment.
#[derive(Debug, Clone)]
pub struct UploadStore {
    store: Arc<dyn ObjectStore>,
    root: PathBuf,
}

impl UploadStore {
    pub fn new(upload_dir: &Path) -> Result<Self, AnalysisError> {
        info!("Initializing upload store at {}", upload_dir.display());

        let store = local_store(upload_dir)?;
        let root = upload_dir.canonicalize()?;

        Ok(Self { store, root })
    }

    /// Maps a path handed out by [`UploadStore::save`] back to its object
    /// location. Paths outside the upload directory are refused.
    fn object_path(&self, stored_path: &str) -> Result<ObjectPath, AnalysisError> {
        let invalid = || AnalysisError::IoError {
            message: format!("Invalid stored file path: {}", stored_path),
        };

        let relative = Path::new(stored_path)
            .strip_prefix(&self.root)
            .map_err(|_| invalid())?;

        let parts = relative
            .components()
            .map(|component| match component {
                Component::Normal(part) => part.to_str().ok_or_else(invalid),
                _ => Err(invalid()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if parts.is_empty() {
            return Err(invalid());
        }
        Ok(ObjectPath::from_iter(parts))
    }

    /// Saves `content` under an already sanitized `/`-separated relative path
    /// and returns the path it can be read back from. An existing file is
    /// never replaced.
    pub async fn save(&self, relative_path: &str, content: Bytes) -> Result<String, AnalysisError> {
        let size = content.len();
        let parts: Vec<&str> = relative_path.split('/').filter(|p| !p.is_empty()).collect();
        let options = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };

        match self
            .store
            .put_opts(&ObjectPath::from_iter(parts.iter().copied()), PutPayload::from(content), options)
            .await
        {
            Ok(_) => {}
            Err(object_store::Error::AlreadyExists { .. }) => {
                return Err(AnalysisError::StorageWrite {
                    message: format!("An upload is already stored at '{}'", relative_path),
                });
            }
            Err(e) => {
                return Err(AnalysisError::StorageWrite {
                    message: format!("Failed to save upload '{}': {}", relative_path, e),
                });
            }
        }

        let stored_path = parts
            .iter()
            .fold(self.root.clone(), |path, part| path.join(part))
            .to_string_lossy()
            .into_owned();
        info!("Saved upload {} ({} bytes)", stored_path, size);
        Ok(stored_path)
    }

    pub async fn read(&self, stored_path: &str) -> Result<Bytes, AnalysisError> {
        let location = self.object_path(stored_path)?;
        Ok(self.store.get(&location).await?.bytes().await?)
    }

    pub async fn remove(&self, stored_path: &str) -> Result<(), AnalysisError> {
        let location = self.object_path(stored_path)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::{Int64Array, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field, Schema};

    fn sample_batch(values: &[i64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("label", DataType::Utf8, true),
        ]));
        let labels: Vec<String> = values.iter().map(|v| format!("row{}", v)).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(values.to_vec())),
                Arc::new(StringArray::from(labels)),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_table_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path()).unwrap();

        store.create_table("events", &sample_batch(&[1, 2])).await.unwrap();
        let original = std::fs::read(store.table_file("events")).unwrap();

        let err = store
            .create_table("events", &sample_batch(&[9]))
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::TableAlreadyExists { .. }));
        assert_eq!(std::fs::read(store.table_file("events")).unwrap(), original);
    }

    #[tokio::test]
    async fn list_and_drop_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path()).unwrap();

        store.create_table("b_table", &sample_batch(&[1])).await.unwrap();
        store.create_table("a_table", &sample_batch(&[1])).await.unwrap();
        std::fs::write(dir.path().join("tables").join("notes.txt"), b"x").unwrap();

        assert_eq!(store.list_tables().await.unwrap(), vec!["a_table", "b_table"]);
        assert!(store.table_exists("a_table").await.unwrap());

        store.drop_table("a_table").await.unwrap();
        assert!(!store.table_exists("a_table").await.unwrap());
        assert_eq!(store.list_tables().await.unwrap(), vec!["b_table"]);

        // Dropping a missing table is not an error.
        store.drop_table("a_table").await.unwrap();
    }

    #[tokio::test]
    async fn create_table_rejects_unsafe_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path()).unwrap();

        let err = store
            .create_table("../escape", &sample_batch(&[1]))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidTableName { .. }));
    }

    #[tokio::test]
    async fn uploads_round_trip_through_stored_path() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(dir.path()).unwrap();

        let path = uploads
            .save("alice/sales/ds_1_q1.csv", Bytes::from_static(b"a,b\n1,2\n"))
            .await
            .unwrap();

        assert!(Path::new(&path).exists());
        assert_eq!(uploads.read(&path).await.unwrap(), Bytes::from_static(b"a,b\n1,2\n"));

        uploads.remove(&path).await.unwrap();
        assert!(!Path::new(&path).exists());
        uploads.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn uploads_never_overwrite_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(dir.path()).unwrap();

        let path = uploads
            .save("alice/sales/ds_1_a.csv", Bytes::from_static(b"first"))
            .await
            .unwrap();
        let err = uploads
            .save("alice/sales/ds_1_a.csv", Bytes::from_static(b"second"))
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::StorageWrite { .. }));
        assert_eq!(uploads.read(&path).await.unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn paths_outside_the_upload_directory_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(&dir.path().join("uploads")).unwrap();
        let outside = dir.path().join("secret.csv");
        std::fs::write(&outside, b"x").unwrap();

        let err = uploads
            .read(&outside.to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::IoError { .. }));
    }
}
