pub mod catalog;
pub mod config;
pub mod database;
pub mod datafusion_engine;
pub mod dataset_manager;
pub mod domain;
pub mod engine;
pub mod error;
pub mod identifiers;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod schema;
pub mod storage;

pub use catalog::{DatasetAnnotation, DatasetMetadata};
pub use config::ServiceConfig;
pub use dataset_manager::{DatasetManager, DatasetUpload};
pub use domain::{OutputFormat, QueryMode, QueryRequest, QueryResponse};
pub use engine::AnalysisEngine;
pub use error::AnalysisError;
pub use llm::SqlGenerator;
