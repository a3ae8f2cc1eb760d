//! Positional statement parameters.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

/// Character large object passed by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clob(pub String);

impl Clob {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A value for a positional statement parameter.
///
/// Only `Null`, `String`, `Integer`, `Decimal`, `Timestamp`, `Boolean`,
/// `Bytes` and `Clob` can be bound. `Long`, `Double` and `Json` are accepted
/// into the model so values from loosely typed sources can be carried around,
/// but binding them fails with `UnsupportedParameterType`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    String(String),
    Integer(i32),
    Decimal(BigDecimal),
    Timestamp(NaiveDateTime),
    /// Stored as a single character, `Y` or `N`.
    Boolean(bool),
    Bytes(Vec<u8>),
    Clob(Clob),
    Long(i64),
    Double(f64),
    Json(JsonValue),
}

impl SqlParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the value can be bound to a statement.
    pub fn is_bindable(&self) -> bool {
        !matches!(self, Self::Long(_) | Self::Double(_) | Self::Json(_))
    }

    /// Get the type name of this parameter for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Timestamp(_) => "timestamp",
            Self::Boolean(_) => "boolean",
            Self::Bytes(_) => "bytes",
            Self::Clob(_) => "clob",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Json(_) => "json",
        }
    }

    /// Y/N encoding used for boolean columns.
    pub fn boolean_flag(value: bool) -> &'static str {
        if value { "Y" } else { "N" }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<BigDecimal> for SqlParam {
    fn from(value: BigDecimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<NaiveDateTime> for SqlParam {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Clob> for SqlParam {
    fn from(value: Clob) -> Self {
        Self::Clob(value)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}
