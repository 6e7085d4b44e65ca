//! Error types for pgqb

use crate::column::Shape;
use std::panic::Location;
use thiserror::Error;

/// Result type alias for pgqb operations
pub type QbResult<T> = Result<T, QbError>;

/// Error types for query building and execution.
///
/// Build-time problems are always reported as [`QbError::Validation`] before any
/// SQL reaches the adapter. Everything else originates from the adapter.
#[derive(Debug, Error)]
pub enum QbError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error reported by tokio-postgres
    #[error("Query error: {source}{}", fmt_location(.location))]
    Query {
        #[source]
        source: tokio_postgres::Error,
        location: Option<&'static Location<'static>>,
    },

    /// Query execution error reported by a non-postgres adapter
    #[error("Adapter error: {message}{}", fmt_location(.location))]
    Adapter {
        message: String,
        location: Option<&'static Location<'static>>,
    },

    /// Row not found (only for `take`/`get`-style return types)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("Unique constraint violation: {constraint}: {message}{}", fmt_location(.location))]
    UniqueViolation {
        constraint: String,
        /// Columns of the violated constraint, mapped back to logical keys
        /// when the query's shape declares them.
        columns: Vec<String>,
        message: String,
        #[source]
        source: Option<tokio_postgres::Error>,
        location: Option<&'static Location<'static>>,
    },

    /// Foreign key constraint violation
    #[error("Foreign key violation: {constraint}: {message}{}", fmt_location(.location))]
    ForeignKeyViolation {
        constraint: String,
        message: String,
        #[source]
        source: Option<tokio_postgres::Error>,
        location: Option<&'static Location<'static>>,
    },

    /// Check constraint violation
    #[error("Check constraint violation: {constraint}: {message}{}", fmt_location(.location))]
    CheckViolation {
        constraint: String,
        message: String,
        #[source]
        source: Option<tokio_postgres::Error>,
        location: Option<&'static Location<'static>>,
    },

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid builder input, detected before any SQL is sent
    #[error("Validation error: {0}")]
    Validation(String),

    /// A conditional insert lost a race and the row could not be re-read
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

fn fmt_location(location: &Option<&'static Location<'static>>) -> String {
    match location {
        Some(loc) => format!(" (at {}:{})", loc.file(), loc.line()),
        None => String::new(),
    }
}

impl QbError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an adapter error without a location.
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
            location: None,
        }
    }

    /// Create a unique violation without an underlying driver error, for
    /// adapters that detect conflicts themselves.
    pub fn unique_violation(
        constraint: impl Into<String>,
        columns: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::UniqueViolation {
            constraint: constraint.into(),
            columns,
            message: message.into(),
            source: None,
            location: None,
        }
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a build-time validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// The call site that issued the failing query, if recorded.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        match self {
            Self::Query { location, .. }
            | Self::Adapter { location, .. }
            | Self::UniqueViolation { location, .. }
            | Self::ForeignKeyViolation { location, .. }
            | Self::CheckViolation { location, .. } => *location,
            _ => None,
        }
    }

    /// Attach the caller's location to execution errors that don't have one yet.
    pub(crate) fn at(mut self, caller: &'static Location<'static>) -> Self {
        match &mut self {
            Self::Query { location, .. }
            | Self::Adapter { location, .. }
            | Self::UniqueViolation { location, .. }
            | Self::ForeignKeyViolation { location, .. }
            | Self::CheckViolation { location, .. } => {
                location.get_or_insert(caller);
            }
            _ => {}
        }
        self
    }

    /// Rewrite the column list of a unique violation from db names to the
    /// logical keys declared in `shape`.
    pub(crate) fn map_unique_columns(self, shape: &Shape) -> Self {
        match self {
            Self::UniqueViolation {
                constraint,
                columns,
                message,
                source,
                location,
            } => Self::UniqueViolation {
                constraint,
                source,
                location,
                columns: columns
                    .into_iter()
                    .map(|db_name| {
                        shape
                            .key_for_db_name(&db_name)
                            .map(str::to_string)
                            .unwrap_or(db_name)
                    })
                    .collect(),
                message,
            },
            other => other,
        }
    }

    /// Parse a tokio_postgres error into a more specific QbError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        let Some(db_err) = err.as_db_error() else {
            return Self::Query {
                source: err,
                location: None,
            };
        };
        let code = db_err.code().clone();
        let constraint = db_err.constraint().unwrap_or("unknown").to_string();
        let message = db_err.message().to_string();
        let columns = db_err.detail().map(parse_key_columns).unwrap_or_default();

        match code.code() {
            "23505" => Self::UniqueViolation {
                constraint,
                columns,
                message,
                source: Some(err),
                location: None,
            },
            "23503" => Self::ForeignKeyViolation {
                constraint,
                message,
                source: Some(err),
                location: None,
            },
            "23514" => Self::CheckViolation {
                constraint,
                message,
                source: Some(err),
                location: None,
            },
            _ => Self::Query {
                source: err,
                location: None,
            },
        }
    }
}

/// Extract column names from a detail message like `Key (a, "B")=(1, 2) already exists.`
pub(crate) fn parse_key_columns(detail: &str) -> Vec<String> {
    let Some(rest) = detail.strip_prefix("Key (") else {
        return Vec::new();
    };
    let Some(end) = rest.find(")=") else {
        return Vec::new();
    };
    rest[..end]
        .split(',')
        .map(|c| c.trim().trim_matches('"').to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for QbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;

    #[test]
    fn parses_unique_key_detail() {
        assert_eq!(
            parse_key_columns("Key (email)=(a@b.c) already exists."),
            vec!["email".to_string()]
        );
        assert_eq!(
            parse_key_columns(r#"Key (org_id, "userName")=(1, x) already exists."#),
            vec!["org_id".to_string(), "userName".to_string()]
        );
        assert!(parse_key_columns("something else").is_empty());
    }

    #[test]
    fn unique_columns_map_to_logical_keys() {
        let shape = Shape::new()
            .column("id", Column::integer().primary_key())
            .column("emailAddress", Column::text().name("email_address"));
        let err =
            QbError::unique_violation("users_email_key", vec!["email_address".into()], "duplicate")
                .map_unique_columns(&shape);

        match err {
            QbError::UniqueViolation { columns, .. } => {
                assert_eq!(columns, vec!["emailAddress".to_string()])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn location_is_attached_once() {
        let first = Location::caller();
        let err = QbError::adapter("boom").at(first);
        assert_eq!(err.location(), Some(first));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn constraint_violations_carry_the_call_site() {
        let here = Location::caller();
        let err = QbError::unique_violation("t_a_key", vec!["a".into()], "duplicate").at(here);
        assert_eq!(err.location(), Some(here));
        assert!(err.to_string().ends_with(&format!("(at {}:{})", here.file(), here.line())));
    }
}
