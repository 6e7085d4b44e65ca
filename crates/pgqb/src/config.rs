//! Database handle configuration.

use crate::error::{QbError, QbResult};

/// Schema tables live in unless they declare their own.
pub const DEFAULT_SCHEMA: &str = "public";

/// Configuration for [`Db`](crate::Db).
///
/// ```ignore
/// let config = DbConfig::new("postgres://postgres@localhost/app")
///     .max_connections(8)
///     .log(true);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    /// Pool size (deadpool `max_size`).
    pub max_connections: usize,
    /// Tables in this schema are not schema-qualified in generated SQL.
    pub schema: String,
    /// Log every query through a [`TracingLogger`](crate::TracingLogger).
    pub log: bool,
    /// Run statements through the prepared-statement cache by default.
    pub auto_prepared_statements: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 16,
            schema: DEFAULT_SCHEMA.to_string(),
            log: false,
            auto_prepared_statements: false,
        }
    }
}

impl DbConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Read `DATABASE_URL`, `PGQB_MAX_CONNECTIONS`, `PGQB_SCHEMA` and `PGQB_LOG`.
    pub fn from_env() -> QbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QbResult<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.is_empty())
            .ok_or_else(|| QbError::Connection("DATABASE_URL is not set".to_string()))?;
        let mut config = Self::new(database_url);

        if let Some(max) = lookup("PGQB_MAX_CONNECTIONS") {
            config.max_connections = max.trim().parse().map_err(|_| {
                QbError::validation(format!("PGQB_MAX_CONNECTIONS must be a positive integer, got `{max}`"))
            })?;
        }
        if let Some(schema) = lookup("PGQB_SCHEMA").filter(|s| !s.is_empty()) {
            config.schema = schema;
        }
        if let Some(log) = lookup("PGQB_LOG") {
            config.log = matches!(log.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(config)
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn log(mut self, enabled: bool) -> Self {
        self.log = enabled;
        self
    }

    pub fn auto_prepared_statements(mut self, enabled: bool) -> Self {
        self.auto_prepared_statements = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_environment() {
        let config = DbConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("PGQB_MAX_CONNECTIONS", "4"),
            ("PGQB_SCHEMA", "app"),
            ("PGQB_LOG", "true"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "postgres://localhost/app");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.schema, "app");
        assert!(config.log);
    }

    #[test]
    fn defaults_and_errors() {
        let config = DbConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap();
        assert_eq!(config.schema, DEFAULT_SCHEMA);
        assert_eq!(config.max_connections, 16);
        assert!(!config.log);

        assert!(matches!(
            DbConfig::from_lookup(lookup(&[])),
            Err(QbError::Connection(_))
        ));
        assert!(
            DbConfig::from_lookup(lookup(&[("DATABASE_URL", "x"), ("PGQB_MAX_CONNECTIONS", "many")]))
                .unwrap_err()
                .is_validation()
        );
    }
}
