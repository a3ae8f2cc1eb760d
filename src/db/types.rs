//! Database-agnostic type mappings.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! Decoded values land in a [`RowSet`], so the result no longer needs the
//! connection it came from.

use crate::models::{ColumnMetadata, DatabaseType, RowSet};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Timestamp,
    Text,
    Binary,
    Json,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // "interval" would otherwise match "int"
    if lower.contains("interval") {
        return TypeCategory::Text;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    // SQLite stores timestamps as text; its text decoder handles them
    if db != DatabaseType::SQLite && (lower.starts_with("timestamp") || lower == "datetime") {
        return TypeCategory::Timestamp;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "clob" {
        return TypeCategory::Text;
    }

    // date, time, uuid, enums... are read back as text
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <bigdecimal::BigDecimal as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // NUMERIC arrives in binary form; go through BigDecimal to keep every digit
        let v = <bigdecimal::BigDecimal as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(v.to_string()))
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode binary column data as a base64 JSON string.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Row Conversion
// =============================================================================

/// Converts a backend row into ordered JSON values.
pub trait RowToValues {
    fn to_values(&self) -> Vec<JsonValue>;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

macro_rules! impl_row_to_values {
    ($row:ty, $db:expr, $decoder:ident) => {
        impl RowToValues for $row {
            fn to_values(&self) -> Vec<JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $db);
                        $decoder::decode_column(self, idx, category)
                    })
                    .collect()
            }

            fn column_metadata(&self) -> Vec<ColumnMetadata> {
                self.columns()
                    .iter()
                    .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
                    .collect()
            }
        }
    };
}

impl_row_to_values!(MySqlRow, DatabaseType::MySQL, mysql);
impl_row_to_values!(PgRow, DatabaseType::PostgreSQL, postgres);
impl_row_to_values!(SqliteRow, DatabaseType::SQLite, sqlite);

/// Buffer fetched rows into a disconnected [`RowSet`].
pub fn to_row_set<R: RowToValues>(rows: &[R], truncated: bool) -> RowSet {
    let columns = rows.first().map(|r| r.column_metadata()).unwrap_or_default();
    let values = rows.iter().map(|r| r.to_values()).collect();
    RowSet::new(columns, values, truncated)
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to decode DECIMAL");
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_timestamp(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_binary_col(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to decode NUMERIC");
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::String(v.to_rfc3339()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_binary_col(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Text => decode_text(row, idx),
            // Expressions (SELECT 1, COUNT(*)) carry the storage class at runtime
            _ => decode_dynamic(row, idx),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(float_value)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_binary_col(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_dynamic(row: &SqliteRow, idx: usize) -> JsonValue {
        use sqlx::ValueRef;

        let Ok(raw) = row.try_get_raw(idx) else {
            return JsonValue::Null;
        };
        if raw.is_null() {
            return JsonValue::Null;
        }
        let storage = raw.type_info().name().to_uppercase();
        match storage.as_str() {
            "INTEGER" => decode_integer(row, idx),
            "REAL" => decode_float(row, idx),
            "BLOB" => decode_binary_col(row, idx),
            _ => decode_text(row, idx),
        }
    }
}
