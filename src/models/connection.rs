//! Connection-related data models.
//!
//! Database backends, isolation levels and the configuration used to build
//! the pooled connection provider.

use crate::config::PoolOptions;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use url::Url;
use url::form_urlencoded;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// URL scheme understood by the driver.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }

    /// Build a driver connection URL from its parts.
    ///
    /// `port` falls back to [`DatabaseType::default_port`]. For SQLite `name`
    /// is the database file path and `host`/`port` are ignored. Extra `params`
    /// are appended URL-encoded in the given order.
    pub fn build_connection_url(
        &self,
        host: &str,
        port: Option<u16>,
        name: &str,
        params: &[(&str, &str)],
    ) -> DbResult<String> {
        if name.is_empty() {
            return Err(DbError::invalid_argument("database name required"));
        }

        let mut url = match self {
            Self::SQLite => format!("sqlite:{}", name),
            Self::PostgreSQL | Self::MySQL => {
                if host.is_empty() {
                    return Err(DbError::invalid_argument("database host required"));
                }
                let port = port.or(self.default_port()).unwrap_or_default();
                let mut url = Url::parse(&format!("{}://{}:{}", self.scheme(), host, port))
                    .map_err(|e| DbError::invalid_argument(format!("Invalid host: {e}")))?;
                url.set_path(&format!("/{}", name));
                url.to_string()
            }
        };

        if !params.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params)
                .finish();
            url.push('?');
            url.push_str(&query);
        }
        Ok(url)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Transaction isolation level requested from the connection provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword form, as used in `SET TRANSACTION ISOLATION LEVEL ...`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Configuration for the pooled connection provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub db_type: DatabaseType,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// Database name extracted from connection URL.
    pub database: Option<String>,
    #[serde(default)]
    pub pool_options: PoolOptions,
}

impl ConnectionConfig {
    /// Create a new connection configuration.
    pub fn new(
        connection_string: impl Into<String>,
        database: Option<String>,
        pool_options: PoolOptions,
    ) -> Result<Self, ConnectionConfigError> {
        let connection_string = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(ConnectionConfigError::EmptyConnectionString);
        }

        let db_type = DatabaseType::from_connection_string(&connection_string)
            .ok_or_else(|| ConnectionConfigError::UnknownDatabaseType(connection_string.clone()))?;

        Ok(Self {
            db_type,
            connection_string,
            database,
            pool_options,
        })
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        if let Some(at_pos) = self.connection_string.find('@') {
            if let Some(colon_pos) = self.connection_string[..at_pos].rfind(':') {
                let prefix = &self.connection_string[..colon_pos + 1];
                let suffix = &self.connection_string[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.connection_string.clone()
    }
}

/// Errors that can occur when creating a connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    #[error("Connection string cannot be empty")]
    EmptyConnectionString,

    /// Could not determine database type from connection string
    #[error("Unknown database type in connection string: {0}")]
    UnknownDatabaseType(String),
}
