//! Query logging.
//!
//! Every adapter call made while logging is enabled (per query with
//! `Query::log`, or globally with `DbConfig::log`) is wrapped in
//! [`QueryLogger::before_query`] / [`QueryLogger::after_query`] /
//! [`QueryLogger::on_error`]. Loggers observe; they never change the outcome.

use crate::error::QbError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::Level;

/// The type of SQL statement being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    /// Transaction control, DDL, TRUNCATE, ...
    Other,
}

impl QueryType {
    /// Detect the statement type from SQL text.
    ///
    /// For `WITH ...` statements the keyword after the CTE list decides, so
    /// `WITH "q" AS (...) INSERT ...` is an insert.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = strip_sql_prefix(sql);
        if starts_with_keyword(trimmed, "WITH") {
            return Self::detect_cte_dml(trimmed);
        }
        Self::from_keyword(trimmed).unwrap_or(QueryType::Other)
    }

    fn from_keyword(sql: &str) -> Option<Self> {
        [
            ("SELECT", QueryType::Select),
            ("INSERT", QueryType::Insert),
            ("UPDATE", QueryType::Update),
            ("DELETE", QueryType::Delete),
        ]
        .into_iter()
        .find(|(kw, _)| starts_with_keyword(sql, kw))
        .map(|(_, t)| t)
    }

    /// The CTE list ends at the first top-level `)` that is followed by
    /// neither `,` (another CTE) nor `AS` (closing a CTE column list).
    fn detect_cte_dml(sql: &str) -> Self {
        let bytes = sql.as_bytes();
        let mut depth: i32 = 0;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        let rest = sql[i + 1..].trim_start();
                        if !rest.starts_with(',') && !starts_with_keyword(rest, "AS") {
                            return Self::from_keyword(rest).unwrap_or(QueryType::Select);
                        }
                    }
                }
                b'\'' | b'"' => {
                    let quote = bytes[i];
                    i += 1;
                    while i < bytes.len() {
                        if bytes[i] == quote {
                            if bytes.get(i + 1) == Some(&quote) {
                                i += 1;
                            } else {
                                break;
                            }
                        }
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        QueryType::Select
    }
}

fn strip_sql_prefix(sql: &str) -> &str {
    let mut s = sql;
    loop {
        let before = s;
        s = s.trim_start().trim_start_matches('(');
        if let Some(rest) = s.strip_prefix("--") {
            s = rest.find('\n').map_or("", |pos| &rest[pos + 1..]);
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = rest.find("*/").map_or("", |pos| &rest[pos + 2..]);
        }
        if s == before {
            return s;
        }
    }
}

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    sql.get(..keyword.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
        && sql[keyword.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_')
}

/// Opaque value returned by `before_query` and handed back afterwards.
#[derive(Debug, Clone, Copy)]
pub struct LogToken {
    started: Instant,
}

impl LogToken {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Hook invoked around every adapter call.
pub trait QueryLogger: Send + Sync {
    fn before_query(&self, sql: &str, param_count: usize) -> LogToken {
        let _ = (sql, param_count);
        LogToken::start()
    }

    fn after_query(&self, sql: &str, token: LogToken);

    fn on_error(&self, error: &QbError, sql: &str, token: LogToken);
}

/// Shareable logger handle stored on queries and the database handle.
#[derive(Clone)]
pub struct Logger(pub(crate) Arc<dyn QueryLogger>);

impl Logger {
    pub fn new(logger: impl QueryLogger + 'static) -> Self {
        Self(Arc::new(logger))
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Logger")
    }
}

impl std::ops::Deref for Logger {
    type Target = dyn QueryLogger;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

pub(crate) fn truncate_sql_bytes(sql: &str, max: usize) -> &str {
    if sql.len() <= max {
        return sql;
    }
    let mut end = max;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// `tracing`-based logger emitting `pgqb.sql` events.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    pub level: Level,
    /// Truncate long SQL strings (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(200),
        }
    }
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    fn truncate_sql<'a>(&self, sql: &'a str) -> std::borrow::Cow<'a, str> {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)).into(),
            _ => sql.into(),
        }
    }
}

macro_rules! emit_at_level {
    ($level:expr, $($field:tt)*) => {
        match $level {
            Level::ERROR => tracing::error!($($field)*),
            Level::WARN => tracing::warn!($($field)*),
            Level::INFO => tracing::info!($($field)*),
            Level::DEBUG => tracing::debug!($($field)*),
            Level::TRACE => tracing::trace!($($field)*),
        }
    };
}

impl QueryLogger for TracingLogger {
    fn before_query(&self, sql: &str, param_count: usize) -> LogToken {
        emit_at_level!(
            self.level,
            target: "pgqb.sql",
            query_type = ?QueryType::from_sql(sql),
            param_count,
            sql = %self.truncate_sql(sql),
        );
        LogToken::start()
    }

    fn after_query(&self, sql: &str, token: LogToken) {
        emit_at_level!(
            self.level,
            target: "pgqb.sql",
            query_type = ?QueryType::from_sql(sql),
            elapsed = ?token.elapsed(),
            "query finished"
        );
    }

    fn on_error(&self, error: &QbError, sql: &str, token: LogToken) {
        tracing::warn!(
            target: "pgqb.sql",
            query_type = ?QueryType::from_sql(sql),
            elapsed = ?token.elapsed(),
            sql = %self.truncate_sql(sql),
            error = %error,
            "query failed"
        );
    }
}

/// Collected statistics of a [`StatsLogger`].
#[derive(Debug, Clone, Default)]
pub struct QueryStats {
    pub total_queries: u64,
    pub failed_queries: u64,
    pub total_duration: Duration,
    pub select_count: u64,
    pub insert_count: u64,
    pub update_count: u64,
    pub delete_count: u64,
    pub max_duration: Duration,
    pub slowest_query: Option<String>,
}

/// A logger that only counts.
#[derive(Debug, Default)]
pub struct StatsLogger {
    total_queries: AtomicU64,
    failed_queries: AtomicU64,
    total_duration_nanos: AtomicU64,
    select_count: AtomicU64,
    insert_count: AtomicU64,
    update_count: AtomicU64,
    delete_count: AtomicU64,
    max_duration_nanos: AtomicU64,
    slowest_query: Mutex<Option<String>>,
}

impl StatsLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> QueryStats {
        QueryStats {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(self.total_duration_nanos.load(Ordering::Relaxed)),
            select_count: self.select_count.load(Ordering::Relaxed),
            insert_count: self.insert_count.load(Ordering::Relaxed),
            update_count: self.update_count.load(Ordering::Relaxed),
            delete_count: self.delete_count.load(Ordering::Relaxed),
            max_duration: Duration::from_nanos(self.max_duration_nanos.load(Ordering::Relaxed)),
            slowest_query: self.slowest_query.lock().ok().and_then(|s| s.clone()),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.total_queries,
            &self.failed_queries,
            &self.total_duration_nanos,
            &self.select_count,
            &self.insert_count,
            &self.update_count,
            &self.delete_count,
            &self.max_duration_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut slowest) = self.slowest_query.lock() {
            *slowest = None;
        }
    }

    fn record(&self, sql: &str, elapsed: Duration) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_duration_nanos.fetch_add(nanos, Ordering::Relaxed);

        let counter = match QueryType::from_sql(sql) {
            QueryType::Select => Some(&self.select_count),
            QueryType::Insert => Some(&self.insert_count),
            QueryType::Update => Some(&self.update_count),
            QueryType::Delete => Some(&self.delete_count),
            QueryType::Other => None,
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        let prev = self.max_duration_nanos.fetch_max(nanos, Ordering::Relaxed);
        if nanos > prev {
            if let Ok(mut slowest) = self.slowest_query.lock() {
                *slowest = Some(sql.to_string());
            }
        }
    }
}

impl QueryLogger for StatsLogger {
    fn after_query(&self, sql: &str, token: LogToken) {
        self.record(sql, token.elapsed());
    }

    fn on_error(&self, _error: &QbError, sql: &str, token: LogToken) {
        self.failed_queries.fetch_add(1, Ordering::Relaxed);
        self.record(sql, token.elapsed());
    }
}

impl<T: QueryLogger + ?Sized> QueryLogger for Arc<T> {
    fn before_query(&self, sql: &str, param_count: usize) -> LogToken {
        (**self).before_query(sql, param_count)
    }

    fn after_query(&self, sql: &str, token: LogToken) {
        (**self).after_query(sql, token)
    }

    fn on_error(&self, error: &QbError, sql: &str, token: LogToken) {
        (**self).on_error(error, sql, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_query_types() {
        assert_eq!(QueryType::from_sql("SELECT 1"), QueryType::Select);
        assert_eq!(QueryType::from_sql("  (select 1)"), QueryType::Select);
        assert_eq!(
            QueryType::from_sql("-- note\nUPDATE \"t\" SET \"a\" = $1"),
            QueryType::Update
        );
        assert_eq!(
            QueryType::from_sql(
                "WITH \"q\" AS (SELECT 1 WHERE 'x)' <> '') INSERT INTO \"t\"(\"a\") SELECT $1"
            ),
            QueryType::Insert
        );
        assert_eq!(QueryType::from_sql("WITH q AS (SELECT 1) SELECT * FROM q"), QueryType::Select);
        assert_eq!(
            QueryType::from_sql(
                r#"WITH "q" AS (SELECT "users".* FROM "users" WHERE "users"."name" = $1 LIMIT 1) INSERT INTO "users" ("name") SELECT $2 WHERE NOT EXISTS (SELECT 1 FROM "q") RETURNING *"#
            ),
            QueryType::Insert
        );
        assert_eq!(
            QueryType::from_sql(
                "WITH a AS (SELECT 1), b(x) AS (SELECT 2) DELETE FROM t WHERE id IN (SELECT x FROM b)"
            ),
            QueryType::Delete
        );
        assert_eq!(QueryType::from_sql("SAVEPOINT \"1\""), QueryType::Other);
        assert_eq!(QueryType::from_sql("SELECTED"), QueryType::Other);
    }

    #[test]
    fn stats_logger_counts() {
        let stats = StatsLogger::new();
        let token = stats.before_query("SELECT 1", 0);
        stats.after_query("SELECT 1", token);
        let token = stats.before_query("DELETE FROM \"t\"", 0);
        stats.on_error(&QbError::adapter("boom"), "DELETE FROM \"t\"", token);

        let s = stats.stats();
        assert_eq!(s.total_queries, 2);
        assert_eq!(s.failed_queries, 1);
        assert_eq!(s.select_count, 1);
        assert_eq!(s.delete_count, 1);

        stats.reset();
        assert_eq!(stats.stats().total_queries, 0);
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_sql_bytes("héllo", 2), "h");
        assert_eq!(truncate_sql_bytes("abc", 10), "abc");
    }
}
