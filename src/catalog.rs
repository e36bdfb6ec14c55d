use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One catalog entry per ingested file. The physical table it describes lives
/// in the table store under `table_name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetMetadata {
    pub id: String,
    pub table_name: String,
    pub display_name: String,
    pub description: String,
    /// `"col (type), col (type), ..."`, fixed at ingestion time.
    pub column_types: String,
    pub row_count: i64,
    pub column_count: i32,
    pub original_filename: String,
    pub stored_file_path: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DatasetMetadata {
    pub fn is_owned_by(&self, user: &str) -> bool {
        self.owner == user
    }

    /// The block this dataset contributes to the language model's schema context.
    pub fn schema_block(&self) -> String {
        format!(
            "Table: {}\nDescription: {}\nColumns: {}",
            self.table_name, self.description, self.column_types
        )
    }
}

/// Editable annotation fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetAnnotation {
    pub display_name: Option<String>,
    pub description: Option<String>,
}

impl DatasetAnnotation {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.description.is_none()
    }
}
