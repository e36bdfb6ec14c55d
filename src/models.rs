use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::catalog::DatasetMetadata;
use crate::schema::datasets;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = datasets)]
#[diesel(primary_key(id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Dataset {
    pub id: String,
    pub table_name: String,
    pub display_name: String,
    pub description: String,
    pub column_types: String,
    pub row_count: i64,
    pub column_count: i32,
    pub original_filename: String,
    pub stored_file_path: String,
    pub owner: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = datasets)]
pub struct NewDataset<'a> {
    pub id: &'a str,
    pub table_name: &'a str,
    pub display_name: &'a str,
    pub description: &'a str,
    pub column_types: &'a str,
    pub row_count: i64,
    pub column_count: i32,
    pub original_filename: &'a str,
    pub stored_file_path: &'a str,
    pub owner: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = datasets)]
pub struct DatasetChanges<'a> {
    pub display_name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub updated_at: NaiveDateTime,
}

impl<'a> From<&'a DatasetMetadata> for NewDataset<'a> {
    fn from(entry: &'a DatasetMetadata) -> Self {
        NewDataset {
            id: &entry.id,
            table_name: &entry.table_name,
            display_name: &entry.display_name,
            description: &entry.description,
            column_types: &entry.column_types,
            row_count: entry.row_count,
            column_count: entry.column_count,
            original_filename: &entry.original_filename,
            stored_file_path: &entry.stored_file_path,
            owner: &entry.owner,
            created_at: entry.created_at.naive_utc(),
            updated_at: entry.updated_at.naive_utc(),
        }
    }
}

impl From<Dataset> for DatasetMetadata {
    fn from(dataset: Dataset) -> Self {
        DatasetMetadata {
            id: dataset.id,
            table_name: dataset.table_name,
            display_name: dataset.display_name,
            description: dataset.description,
            column_types: dataset.column_types,
            row_count: dataset.row_count,
            column_count: dataset.column_count,
            original_filename: dataset.original_filename,
            stored_file_path: dataset.stored_file_path,
            owner: dataset.owner,
            created_at: DateTime::<Utc>::from_naive_utc_and_offset(dataset.created_at, Utc),
            updated_at: DateTime::<Utc>::from_naive_utc_and_offset(dataset.updated_at, Utc),
        }
    }
}
