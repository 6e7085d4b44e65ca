//! Database adapters.
//!
//! The query layer talks to the database through two traits: an [`Adapter`]
//! sends statements on any pooled connection, and a [`Connection`] is one
//! acquired connection that transactions pin their statements to.

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "pool")]
mod postgres;

#[cfg(feature = "pool")]
pub use postgres::{PgAdapter, PgConnection, create_pool, create_pool_with_manager_config};

use crate::compiler::CompiledSql;
use crate::error::QbResult;
use crate::record::Record;
use crate::value::Value;
use async_trait::async_trait;

/// Rows decoded as records.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub rows: Vec<Record>,
    /// Rows affected (mutations) or returned (selects).
    pub row_count: u64,
}

/// A result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub type_name: String,
}

/// Rows decoded as positional arrays.
#[derive(Debug, Clone, Default)]
pub struct ArraysOutput {
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: u64,
}

/// One acquired connection.
#[async_trait]
pub trait Connection: Send {
    async fn query(&mut self, sql: &CompiledSql, prepare: bool) -> QbResult<QueryOutput>;

    async fn arrays(&mut self, sql: &CompiledSql, prepare: bool) -> QbResult<ArraysOutput>;

    /// Run a parameterless statement (`BEGIN`, `SAVEPOINT "1"`, ...).
    async fn execute(&mut self, sql: &str) -> QbResult<()>;
}

/// A source of connections.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn query(&self, sql: &CompiledSql, prepare: bool) -> QbResult<QueryOutput>;

    async fn arrays(&self, sql: &CompiledSql, prepare: bool) -> QbResult<ArraysOutput>;

    /// Take a dedicated connection, e.g. for a transaction.
    async fn acquire(&self) -> QbResult<Box<dyn Connection>>;

    async fn close(&self);
}
