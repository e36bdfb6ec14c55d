use std::str::FromStr;
use std::sync::Arc;

use datafusion::arrow::array::ArrayRef;
use datafusion::arrow::compute::cast;
use datafusion::arrow::csv::WriterBuilder as CsvWriterBuilder;
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::json::writer::{JsonArray, WriterBuilder as JsonWriterBuilder};
use datafusion::arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMode {
    #[serde(rename = "literal-sql")]
    LiteralSql,
    #[serde(rename = "natural-language")]
    NaturalLanguage,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::LiteralSql => "literal-sql",
            QueryMode::NaturalLanguage => "natural-language",
        }
    }
}

impl FromStr for QueryMode {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "sql" | "literal" | "literal-sql" => Ok(QueryMode::LiteralSql),
            "ai" | "nl" | "natural-language" => Ok(QueryMode::NaturalLanguage),
            other => Err(AnalysisError::InvalidSqlQuery {
                message: format!("Unknown query mode: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "json")]
    Json,
    #[default]
    #[serde(rename = "csv")]
    Csv,
}

impl OutputFormat {
    /// Anything other than `json` renders as CSV.
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => OutputFormat::Json,
            _ => OutputFormat::Csv,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub mode: QueryMode,
    pub input: String,
    #[serde(default)]
    pub format: OutputFormat,
}

impl QueryRequest {
    pub fn sql(sql: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            mode: QueryMode::LiteralSql,
            input: sql.into(),
            format,
        }
    }

    pub fn natural_language(question: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            mode: QueryMode::NaturalLanguage,
            input: question.into(),
            format,
        }
    }
}

/// A successful query, serialized.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub sql: String,
    /// Set in natural-language mode so the caller can audit what ran.
    pub generated_sql: Option<String>,
    pub format: OutputFormat,
    pub row_count: usize,
    pub body: String,
}

/// What the request boundary hands back: either a result or a message, never both.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResponse {
    pub result: Option<String>,
    pub generated_sql: Option<String>,
    pub row_count: Option<usize>,
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn succeeded(outcome: QueryOutcome) -> Self {
        Self {
            result: Some(outcome.body),
            generated_sql: outcome.generated_sql,
            row_count: Some(outcome.row_count),
            error: None,
        }
    }

    pub fn failed(error: &AnalysisError, generated_sql: Option<String>) -> Self {
        Self {
            result: None,
            generated_sql,
            row_count: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Materialized rows of one query.
#[derive(Debug, Clone)]
pub struct QueryResultSet {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl QueryResultSet {
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.fields().iter().map(|f| f.name().clone()).collect()
    }

    pub fn render(&self, format: OutputFormat) -> Result<String, AnalysisError> {
        match format {
            OutputFormat::Json => self.to_json(),
            OutputFormat::Csv => self.to_csv(),
        }
    }

    /// Array of row objects, keys in column order, two-space indentation.
    pub fn to_json(&self) -> Result<String, AnalysisError> {
        if self.row_count() == 0 || self.schema.fields().is_empty() {
            return Ok("[]".to_string());
        }

        let batches = self.normalized_batches()?;
        let mut writer = JsonWriterBuilder::new()
            .with_explicit_nulls(true)
            .build::<_, JsonArray>(Vec::new());
        for batch in &batches {
            writer.write(batch)?;
        }
        writer.finish()?;

        let rows: serde_json::Value = serde_json::from_slice(&writer.into_inner())?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    /// Header row plus data rows; no index column. A result without columns
    /// renders as an empty document.
    pub fn to_csv(&self) -> Result<String, AnalysisError> {
        if self.schema.fields().is_empty() {
            return Ok(String::new());
        }

        let mut batches = self.normalized_batches()?;
        if batches.is_empty() {
            batches.push(RecordBatch::new_empty(normalize_schema(&self.schema)));
        }

        let mut writer = CsvWriterBuilder::new().with_header(true).build(Vec::new());
        for batch in &batches {
            writer.write(batch)?;
        }

        String::from_utf8(writer.into_inner()).map_err(|e| AnalysisError::InternalError {
            message: format!("CSV output was not UTF-8: {}", e),
        })
    }

    /// Casts view and large string columns to plain Utf8 so both writers
    /// accept them.
    fn normalized_batches(&self) -> Result<Vec<RecordBatch>, AnalysisError> {
        let schema = normalize_schema(&self.schema);
        self.batches
            .iter()
            .filter(|b| b.num_rows() > 0)
            .map(|batch| {
                let columns = batch
                    .columns()
                    .iter()
                    .zip(schema.fields())
                    .map(|(column, field)| {
                        if column.data_type() == field.data_type() {
                            Ok(column.clone())
                        } else {
                            cast(column, field.data_type())
                        }
                    })
                    .collect::<Result<Vec<ArrayRef>, _>>()?;
                Ok(RecordBatch::try_new(schema.clone(), columns)?)
            })
            .collect()
    }
}

fn normalize_schema(schema: &SchemaRef) -> SchemaRef {
    let fields = schema
        .fields()
        .iter()
        .map(|field| match field.data_type() {
            DataType::Utf8View | DataType::LargeUtf8 => {
                Field::new(field.name(), DataType::Utf8, field.is_nullable())
            }
            _ => field.as_ref().clone(),
        })
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::{BooleanArray, Float64Array, Int64Array, StringViewArray};

    fn people() -> QueryResultSet {
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8View, true),
            Field::new("age", DataType::Int64, true),
            Field::new("score", DataType::Float64, true),
            Field::new("active", DataType::Boolean, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringViewArray::from(vec![Some("ann"), Some("bo, jr")])),
                Arc::new(Int64Array::from(vec![Some(31), None])),
                Arc::new(Float64Array::from(vec![Some(2.5), Some(-1.0)])),
                Arc::new(BooleanArray::from(vec![Some(true), Some(false)])),
            ],
        )
        .unwrap();
        QueryResultSet {
            schema,
            batches: vec![batch],
        }
    }

    #[test]
    fn json_keeps_column_order_and_explicit_nulls() {
        let json = people().to_json().unwrap();
        let rows: serde_json::Value = serde_json::from_str(&json).unwrap();

        let first = rows[0].as_object().unwrap();
        assert_eq!(
            first.keys().collect::<Vec<_>>(),
            vec!["name", "age", "score", "active"]
        );
        assert_eq!(rows[0]["age"], serde_json::json!(31));
        assert!(rows[1]["age"].is_null());
        assert_eq!(rows[1]["name"], serde_json::json!("bo, jr"));
        assert_eq!(rows[0]["score"].as_f64(), Some(2.5));
        assert_eq!(rows[1]["active"], serde_json::json!(false));
    }

    #[test]
    fn json_is_indented_with_two_spaces() {
        let json = people().to_json().unwrap();
        assert!(json.starts_with("[\n  {\n    \"name\""));
    }

    #[test]
    fn csv_has_header_and_quotes_embedded_commas() {
        let csv = people().to_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "name,age,score,active");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("\"bo, jr\",,"));
    }

    #[test]
    fn empty_result_renders_header_only_csv_and_empty_json() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::Utf8, true),
        ]));
        let empty = QueryResultSet {
            schema,
            batches: vec![],
        };

        assert_eq!(empty.to_json().unwrap(), "[]");
        assert_eq!(empty.to_csv().unwrap().trim_end(), "a,b");
        assert_eq!(empty.row_count(), 0);
    }

    #[test]
    fn result_without_columns_renders_empty() {
        let nothing = QueryResultSet {
            schema: Arc::new(Schema::empty()),
            batches: vec![],
        };

        assert_eq!(nothing.to_csv().unwrap(), "");
        assert_eq!(nothing.to_json().unwrap(), "[]");
    }

    #[test]
    fn unknown_format_defaults_to_csv() {
        assert_eq!(OutputFormat::from_param(Some("json")), OutputFormat::Json);
        assert_eq!(OutputFormat::from_param(Some(" JSON ")), OutputFormat::Json);
        assert_eq!(OutputFormat::from_param(Some("xml")), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_param(None), OutputFormat::Csv);
    }

    #[test]
    fn query_mode_parses_aliases() {
        assert_eq!("sql".parse::<QueryMode>().unwrap(), QueryMode::LiteralSql);
        assert_eq!(
            "natural-language".parse::<QueryMode>().unwrap(),
            QueryMode::NaturalLanguage
        );
        assert!("shell".parse::<QueryMode>().is_err());
    }

    #[test]
    fn failed_response_carries_only_the_message() {
        let response = QueryResponse::failed(&AnalysisError::NoDatasetsAvailable, None);

        assert!(!response.is_success());
        assert!(response.result.is_none());
        assert!(response.error.unwrap().contains("No datasets available"));
    }
}
