//! Validation for names that end up in SQL text or on disk.
//!
//! Table names are chosen by users at upload time, so they are data rather
//! than schema. Anything interpolated into a query or a storage path goes
//! through [`validate_table_name`] or [`secure_filename`] first.

use datafusion::sql::sqlparser::keywords::{
    Keyword, ALL_KEYWORDS, ALL_KEYWORDS_INDEX, RESERVED_FOR_COLUMN_ALIAS, RESERVED_FOR_IDENTIFIER,
    RESERVED_FOR_TABLE_ALIAS, RESERVED_FOR_TABLE_FACTOR,
};

use crate::error::AnalysisError;

pub const MAX_TABLE_NAME_LEN: usize = 100;
pub const ALLOWED_EXTENSIONS: [&str; 2] = ["csv", "txt"];

/// Accepts `[a-z_][a-z0-9_]*`. Unquoted identifiers are folded to lowercase by
/// the SQL planner, so uppercase names would not be reachable.
pub fn validate_table_name(table_name: &str) -> Result<&str, AnalysisError> {
    if table_name.is_empty() {
        return Err(AnalysisError::TableNameRequired);
    }

    let invalid = |reason: &str| AnalysisError::InvalidTableName {
        table_name: table_name.to_string(),
        reason: reason.to_string(),
    };

    if table_name.len() > MAX_TABLE_NAME_LEN {
        return Err(invalid(&format!(
            "must be at most {} characters",
            MAX_TABLE_NAME_LEN
        )));
    }

    let mut chars = table_name.chars();
    if let Some(first) = chars.next() {
        if !(first.is_ascii_lowercase() || first == '_') {
            return Err(invalid("must start with a lowercase letter or underscore"));
        }
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(invalid(
            "may only contain lowercase letters, digits and underscores",
        ));
    }

    if is_reserved_keyword(table_name) {
        return Err(invalid("is a reserved SQL keyword"));
    }

    Ok(table_name)
}

/// Keywords the SQL parser will not read as a bare table name in every
/// position a generated query may put it.
pub fn is_reserved_keyword(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    let Some(keyword) = ALL_KEYWORDS
        .binary_search(&upper.as_str())
        .ok()
        .and_then(|index| ALL_KEYWORDS_INDEX.get(index))
    else {
        return false;
    };

    matches!(keyword, Keyword::TABLE)
        || RESERVED_FOR_TABLE_ALIAS.contains(keyword)
        || RESERVED_FOR_COLUMN_ALIAS.contains(keyword)
        || RESERVED_FOR_TABLE_FACTOR.contains(keyword)
        || RESERVED_FOR_IDENTIFIER.contains(keyword)
}

pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Reduces a user-supplied filename to a flat, portable name: ASCII only,
/// no path separators, whitespace collapsed to `_`.
pub fn secure_filename(filename: &str) -> String {
    let flattened: String = filename
        .chars()
        .filter(|c| c.is_ascii())
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Relative path of a raw upload: `<owner>/<table>/<dataset id>_<filename>`.
///
/// Each part is its own path segment, so separators inside owner or table
/// names cannot make two uploads meet, and the dataset id keeps a re-used
/// table name from landing on a file left behind by an earlier upload.
pub fn stored_upload_path(
    owner: &str,
    table_name: &str,
    dataset_id: &str,
    original_filename: &str,
) -> String {
    format!(
        "{}/{}/{}",
        secure_filename(owner),
        secure_filename(table_name),
        secure_filename(&format!("{}_{}", dataset_id, original_filename))
    )
}
