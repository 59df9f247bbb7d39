//! Connection configuration.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use synctrack_core::{Dialect, SqlServerDialect, SqliteDialect};

use crate::error::Result;

/// The SQL dialect a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Sqlite,
    #[serde(alias = "mssql")]
    SqlServer,
}

impl DialectKind {
    /// Returns the dialect implementation.
    #[must_use]
    pub fn dialect(self) -> Arc<dyn Dialect> {
        match self {
            Self::Sqlite => Arc::new(SqliteDialect),
            Self::SqlServer => Arc::new(SqlServerDialect),
        }
    }
}

/// Settings of a [`Connection`](crate::Connection).
///
/// ```json
/// { "dialect": "sqlite", "database": "app.db", "trace": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub dialect: DialectKind,
    /// Database file (SQLite) or catalog name (SQL Server).
    pub database: String,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Log every executed statement at debug level.
    pub trace: bool,
    /// Log statement timings at info level.
    pub time_execution: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::Sqlite,
            database: ":memory:".to_string(),
            server: None,
            port: None,
            user: None,
            password: None,
            trace: false,
            time_execution: false,
        }
    }
}

impl ConnectionConfig {
    /// A SQLite configuration for `database` (a path or `:memory:`).
    pub fn sqlite(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// A SQL Server configuration using integrated security.
    pub fn sql_server(server: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            dialect: DialectKind::SqlServer,
            database: database.into(),
            server: Some(server.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub const fn with_time_execution(mut self, time_execution: bool) -> Self {
        self.time_execution = time_execution;
        self
    }

    /// Parses a configuration from JSON; absent keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Json`](crate::OrmError::Json) for malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be read, or a JSON error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Returns the dialect implementation.
    #[must_use]
    pub fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.dialect()
    }

    /// Renders the SQL Server connection string.
    #[must_use]
    pub fn connection_string(&self) -> String {
        let server = self.server.as_deref().unwrap_or("localhost");
        let mut out = format!("Data Source=TCP:{server}");
        if let Some(port) = self.port {
            out.push_str(&format!(",{port}"));
        }
        out.push_str(&format!(";Initial Catalog={};", self.database));
        match &self.user {
            Some(user) => {
                out.push_str(&format!(
                    "User ID={user};Password={};",
                    self.password.as_deref().unwrap_or_default()
                ));
            }
            None => out.push_str("Integrated Security=True;"),
        }
        out
    }

    /// Renders the sqlx SQLite URL.
    #[must_use]
    pub fn sqlite_url(&self) -> String {
        if self.database.starts_with("sqlite:") {
            self.database.clone()
        } else if self.database.is_empty() || self.database == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}", self.database)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::from_json("{}").unwrap();
        assert_eq!(config, ConnectionConfig::default());
        assert_eq!(config.sqlite_url(), "sqlite::memory:");
        assert!(!config.trace);
    }

    #[test]
    fn test_json_fields() {
        let config = ConnectionConfig::from_json(
            r#"{"dialect": "sqlserver", "database": "Sales", "server": "db01", "port": 1433,
                "user": "sa", "password": "pw", "time_execution": true}"#,
        )
        .unwrap();
        assert_eq!(config.dialect, DialectKind::SqlServer);
        assert!(config.time_execution);
        assert_eq!(
            config.connection_string(),
            "Data Source=TCP:db01,1433;Initial Catalog=Sales;User ID=sa;Password=pw;"
        );
        assert_eq!(config.dialect().name(), "sqlserver");
    }

    #[test]
    fn test_integrated_security() {
        let config = ConnectionConfig::sql_server("db01", "Sales");
        assert_eq!(
            config.connection_string(),
            "Data Source=TCP:db01;Initial Catalog=Sales;Integrated Security=True;"
        );
    }

    #[test]
    fn test_sqlite_urls() {
        assert_eq!(ConnectionConfig::sqlite("app.db").sqlite_url(), "sqlite:app.db");
        assert_eq!(
            ConnectionConfig::sqlite("sqlite://data/app.db").sqlite_url(),
            "sqlite://data/app.db"
        );
    }

    #[test]
    fn test_malformed_json() {
        let err = ConnectionConfig::from_json("{\"trace\": 3}").unwrap_err();
        assert!(matches!(err, crate::OrmError::Json(_)));
    }
}
