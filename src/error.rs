use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Table name is required.")]
    TableNameRequired,

    #[error("Invalid table name \"{table_name}\": {reason}")]
    InvalidTableName { table_name: String, reason: String },

    #[error("Table name \"{table_name}\" already exists. Please choose another name.")]
    DuplicateTable { table_name: String },

    #[error("Invalid file or file type \"{filename}\". Only CSV/TXT allowed.")]
    UnsupportedFileType { filename: String },

    #[error("Error processing file: {message}")]
    ParseError { message: String },

    #[error("Table \"{table_name}\" already exists in the data store")]
    TableAlreadyExists { table_name: String },

    #[error("Error saving dataset: {message}")]
    StorageWrite { message: String },

    #[error("Error recording dataset metadata: {message}")]
    CatalogWrite { message: String },

    #[error("Dataset not found: {dataset_id}")]
    DatasetNotFound { dataset_id: String },

    #[error("Dataset {dataset_id} not found or you do not have permission to modify it")]
    PermissionDenied { dataset_id: String },

    #[error("No datasets available to answer the question. Upload a dataset first.")]
    NoDatasetsAvailable,

    #[error("Language model error: {message}")]
    LlmError { message: String },

    #[error("Invalid SQL query: {message}")]
    InvalidSqlQuery { message: String },

    #[error("Query execution failed: {message}")]
    QueryExecutionFailed { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("DataFusion error: {0}")]
    DataFusionError(#[from] datafusion::error::DataFusionError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] datafusion::arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] datafusion::parquet::errors::ParquetError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl From<std::io::Error> for AnalysisError {
    fn from(err: std::io::Error) -> Self {
        AnalysisError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for AnalysisError {
    fn from(err: csv::Error) -> Self {
        AnalysisError::ParseError {
            message: err.to_string(),
        }
    }
}

impl From<diesel::result::Error> for AnalysisError {
    fn from(err: diesel::result::Error) -> Self {
        AnalysisError::DatabaseError {
            message: err.to_string(),
        }
    }
}

impl AnalysisError {
    /// Validation failures happen before anything is written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AnalysisError::TableNameRequired
                | AnalysisError::InvalidTableName { .. }
                | AnalysisError::DuplicateTable { .. }
                | AnalysisError::UnsupportedFileType { .. }
        )
    }
}
