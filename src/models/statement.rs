//! Statement descriptor and its result-set options.

use serde::{Deserialize, Serialize};

/// Cursor movement requested for a statement's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSetType {
    #[default]
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

/// Whether results may be updated through the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSetConcurrency {
    #[default]
    ReadOnly,
    Updatable,
}

/// Description of a pending statement, owned by exactly one statement proxy.
///
/// Everything except `sql` is fixed at construction; plain statements rewrite
/// `sql` each time a new text is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementDescriptor {
    result_set_type: ResultSetType,
    result_set_concurrency: ResultSetConcurrency,
    sql: Option<String>,
    transaction_name: Option<String>,
}

impl StatementDescriptor {
    pub fn new(
        result_set_type: ResultSetType,
        result_set_concurrency: ResultSetConcurrency,
        sql: Option<String>,
        transaction_name: Option<String>,
    ) -> Self {
        Self {
            result_set_type,
            result_set_concurrency,
            sql,
            transaction_name: transaction_name.filter(|name| !name.is_empty()),
        }
    }

    /// Descriptor for a statement whose text is known up front.
    pub fn with_sql(
        result_set_type: ResultSetType,
        result_set_concurrency: ResultSetConcurrency,
        sql: impl Into<String>,
        transaction_name: Option<&str>,
    ) -> Self {
        Self::new(
            result_set_type,
            result_set_concurrency,
            Some(sql.into()),
            transaction_name.map(String::from),
        )
    }

    pub fn result_set_type(&self) -> ResultSetType {
        self.result_set_type
    }

    pub fn result_set_concurrency(&self) -> ResultSetConcurrency {
        self.result_set_concurrency
    }

    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    pub fn set_sql(&mut self, sql: impl Into<String>) {
        self.sql = Some(sql.into());
    }

    pub fn transaction_name(&self) -> Option<&str> {
        self.transaction_name.as_deref()
    }
}

impl std::fmt::Display for StatementDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StatementDescriptor[SQL={}", self.sql.as_deref().unwrap_or(""))?;
        if let Some(name) = &self.transaction_name {
            write!(f, " TrxName={}", name)?;
        }
        f.write_str("]")
    }
}
