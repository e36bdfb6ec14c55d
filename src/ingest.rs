//! Structure inference for uploaded CSV/TXT files.
//!
//! Uploads carry no declared delimiter. [`infer_table`] parses the bytes as
//! comma-separated first and, when that produces a single column, tries a
//! whitespace-run delimiter as a second candidate. The better candidate wins.

use std::collections::HashSet;
use std::sync::Arc;

use datafusion::arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use tracing::debug;

use crate::error::AnalysisError;

/// Cell values treated as missing.
const NA_VALUES: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "NULL", "null", "None", "<NA>", "#N/A",
    "#NA",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Whitespace,
}

impl Delimiter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delimiter::Comma => "comma",
            Delimiter::Whitespace => "whitespace",
        }
    }
}

impl std::fmt::Display for Delimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct InferredColumn {
    pub name: String,
    pub data_type: DataType,
    pub cells: Vec<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct InferredTable {
    pub columns: Vec<InferredColumn>,
    pub row_count: usize,
    pub delimiter: Delimiter,
}

impl InferredTable {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// `"name (label), name (label), ..."`, the only shape description the
    /// language model ever sees.
    pub fn column_types_summary(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} ({})", c.name, friendly_type(&c.data_type)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(&c.name, c.data_type.clone(), true))
                .collect::<Vec<_>>(),
        )
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch, AnalysisError> {
        let arrays = self
            .columns
            .iter()
            .map(build_array)
            .collect::<Vec<ArrayRef>>();

        Ok(RecordBatch::try_new(Arc::new(self.schema()), arrays)?)
    }
}

/// Parses raw upload bytes into a typed table, choosing between the comma and
/// whitespace candidates.
pub fn infer_table(bytes: &[u8]) -> Result<InferredTable, AnalysisError> {
    let text = decode(bytes)?;

    let comma = build_table(tokenize_comma(text)?, Delimiter::Comma)?;
    if comma.column_count() != 1 {
        return Ok(comma);
    }

    match build_table(tokenize_whitespace(text), Delimiter::Whitespace) {
        Ok(candidate) if candidate.column_count() > 1 => {
            debug!(
                "Single-column comma parse replaced by whitespace parse with {} columns",
                candidate.column_count()
            );
            Ok(candidate)
        }
        Ok(_) => Ok(comma),
        Err(e) => {
            debug!("Whitespace candidate rejected: {}", e);
            Ok(comma)
        }
    }
}

/// Maps a storage type onto the closed label set used in column summaries.
pub fn friendly_type(data_type: &DataType) -> String {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "int".to_string(),
        DataType::Float16 | DataType::Float32 | DataType::Float64 => "float".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "str".to_string(),
        DataType::Boolean => "bool".to_string(),
        other => other.to_string(),
    }
}

fn decode(bytes: &[u8]) -> Result<&str, AnalysisError> {
    let text = std::str::from_utf8(bytes).map_err(|e| AnalysisError::ParseError {
        message: format!("file is not valid UTF-8: {}", e),
    })?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

fn tokenize_comma(text: &str) -> Result<Vec<Vec<String>>, AnalysisError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.len() <= 1 && record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        records.push(
            record
                .iter()
                .map(|field| field.trim_start().to_string())
                .collect(),
        );
    }
    Ok(records)
}

fn tokenize_whitespace(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .collect()
}

fn build_table(
    records: Vec<Vec<String>>,
    delimiter: Delimiter,
) -> Result<InferredTable, AnalysisError> {
    let mut rows = records.into_iter();
    let header = rows.next().ok_or_else(|| AnalysisError::ParseError {
        message: "no columns to parse from file".to_string(),
    })?;

    let names = clean_column_names(&header);
    let width = names.len();
    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); width];
    let mut row_count = 0;

    for (index, row) in rows.enumerate() {
        if row.len() > width {
            return Err(AnalysisError::ParseError {
                message: format!(
                    "expected {} fields in data row {}, saw {}",
                    width,
                    index + 1,
                    row.len()
                ),
            });
        }

        let mut values = row.into_iter();
        for column in cells.iter_mut() {
            column.push(values.next().and_then(normalize_cell));
        }
        row_count += 1;
    }

    let columns = names
        .into_iter()
        .zip(cells)
        .map(|(name, cells)| InferredColumn {
            data_type: infer_column_type(&cells),
            name,
            cells,
        })
        .collect();

    Ok(InferredTable {
        columns,
        row_count,
        delimiter,
    })
}

fn normalize_cell(raw: String) -> Option<String> {
    if NA_VALUES.contains(&raw.trim()) {
        None
    } else {
        Some(raw)
    }
}

/// Strips quote characters and surrounding whitespace, lowercases, names blank
/// headers `unnamed: <i>` and suffixes repeats with `.1`, `.2`, ...
///
/// Unquoted identifiers are folded to lowercase by the SQL planner, so a
/// lowercase column is reachable however a query spells it.
fn clean_column_names(header: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(header.len());

    for (index, raw) in header.iter().enumerate() {
        let mut base = raw.replace('"', "").trim().to_lowercase();
        if base.is_empty() {
            base = format!("unnamed: {}", index);
        }

        let mut candidate = base.clone();
        let mut suffix = 0;
        while taken.contains(&candidate) {
            suffix += 1;
            candidate = format!("{}.{}", base, suffix);
        }

        taken.insert(candidate.clone());
        names.push(candidate);
    }

    names
}

fn infer_column_type(cells: &[Option<String>]) -> DataType {
    let values: Vec<&str> = cells.iter().flatten().map(|v| v.trim()).collect();

    if values.is_empty() {
        DataType::Utf8
    } else if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        DataType::Int64
    } else if values.iter().all(|v| v.parse::<f64>().is_ok()) {
        DataType::Float64
    } else if values.iter().all(|v| parse_bool(v).is_some()) {
        DataType::Boolean
    } else {
        DataType::Utf8
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

fn build_array(column: &InferredColumn) -> ArrayRef {
    let trimmed = || column.cells.iter().map(|c| c.as_deref().map(str::trim));

    match column.data_type {
        DataType::Int64 => Arc::new(
            trimmed()
                .map(|v| v.and_then(|v| v.parse::<i64>().ok()))
                .collect::<Int64Array>(),
        ),
        DataType::Float64 => Arc::new(
            trimmed()
                .map(|v| v.and_then(|v| v.parse::<f64>().ok()))
                .collect::<Float64Array>(),
        ),
        DataType::Boolean => Arc::new(
            trimmed()
                .map(|v| v.and_then(parse_bool))
                .collect::<BooleanArray>(),
        ),
        _ => Arc::new(
            column
                .cells
                .iter()
                .map(|c| c.as_deref())
                .collect::<StringArray>(),
        ),
    }
}
