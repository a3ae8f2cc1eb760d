//! Disconnected, fully buffered query results.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Column information captured when a row set is materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "int8", "varchar", "TEXT")
    pub type_name: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A copy of a result set that no longer references its connection.
///
/// Rows keep the column order of the query. Values are decoded to JSON the
/// same way for every backend; decimals come back as strings so no precision
/// is lost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    columns: Vec<ColumnMetadata>,
    rows: Vec<Vec<JsonValue>>,
    /// True when `max_rows` cut the result short.
    truncated: bool,
}

impl RowSet {
    pub fn new(columns: Vec<ColumnMetadata>, rows: Vec<Vec<JsonValue>>, truncated: bool) -> Self {
        Self {
            columns,
            rows,
            truncated,
        }
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<JsonValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Zero-based position of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn row(&self, index: usize) -> Option<&[JsonValue]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Value at `row` by column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&JsonValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// First column of the first row as a 32-bit integer.
    ///
    /// Numeric strings (decimals) are truncated toward zero.
    pub fn first_int(&self) -> Option<i32> {
        let value = self.rows.first()?.first()?;
        match value {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .and_then(|v| i32::try_from(v).ok()),
            JsonValue::String(s) => {
                let trimmed = s.trim();
                let integral = trimmed.split('.').next().unwrap_or(trimmed);
                integral.parse::<i32>().ok()
            }
            JsonValue::Bool(b) => Some(i32::from(*b)),
            _ => None,
        }
    }

    /// Rows as name/value maps.
    pub fn to_json_maps(&self) -> Vec<serde_json::Map<String, JsonValue>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, value)| (col.name.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }
}
