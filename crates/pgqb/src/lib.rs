//! # pgqb
//!
//! A composable, immutable query builder for PostgreSQL.
//!
//! ## Features
//!
//! - **Immutable descriptors**: every builder call returns a new [`Query`]; clones never share state
//! - **Parameterized SQL**: values are always bound as `$n` placeholders, identifiers always quoted
//! - **Declared tables**: column shapes map logical keys to database names, defaults, encoders and parsers
//! - **Lifecycle hooks**: before/after hooks per statement kind, after-commit hooks that respect savepoints
//! - **Transactions**: task-scoped transactions with automatic savepoints for nested calls
//! - **Find-or-create / upsert**: race-safe conditional inserts guarded by the read query
//!
//! ## Example
//!
//! ```ignore
//! use pgqb::{Column, Db, DbConfig, Shape, Table, record};
//!
//! let users = Table::new(
//!     "users",
//!     Shape::new()
//!         .column("id", Column::integer().primary_key())
//!         .column("name", Column::text())
//!         .column("created_at", Column::timestamptz().name("createdAt")),
//! );
//!
//! let db = Db::connect(DbConfig::from_env()?)?;
//!
//! // SELECT "users"."id", "users"."name", "users"."createdAt" AS "created_at"
//! // FROM "users" WHERE "users"."name" = $1
//! let rows = users.query().where_eq("name", "alice").fetch_all(&db).await?;
//!
//! let id = users
//!     .query()
//!     .create(record! { "name" => "bob" })
//!     .get("id")
//!     .fetch_value(&db)
//!     .await?;
//!
//! db.transaction(|| async {
//!     users.query().find(1).update(record! { "name" => "carol" }).execute(&db).await?;
//!     Ok(())
//! })
//! .await?;
//! ```

pub mod adapter;
pub mod column;
pub mod compiler;
pub mod config;
pub mod db;
pub mod error;
pub mod expr;
pub mod ident;
pub mod logger;
pub mod predicate;
pub mod query;
pub mod raw;
pub mod record;
pub mod table;
pub mod transaction;
pub mod value;

pub use adapter::{Adapter, ArraysOutput, Connection, Field, QueryOutput};
pub use column::{Column, ColumnDefault, Shape, ValueFn};
pub use compiler::CompiledSql;
pub use config::{DEFAULT_SCHEMA, DbConfig};
pub use db::Db;
pub use error::{QbError, QbResult};
pub use expr::{
    ColumnRef, Expr, IntoExpr, Nulls, OrderItem, SelectItem, SortDir, WindowSpec, avg, col, count,
    count_of, func, max, min, rank, row_number, sum, val,
};
pub use logger::{LogToken, Logger, QueryLogger, QueryStats, QueryType, StatsLogger, TracingLogger};
pub use predicate::{JoinOn, Op, Predicate, WhereBuilder};
pub use query::{
    CreateData, HookPhase, Hooks, JoinKind, Outcome, Query, QueryKind, ReturnType, SetOpKind,
};
pub use raw::{RawSql, sql};
pub use record::{Data, Record};
pub use table::Table;
pub use transaction::{IsolationLevel, TransactionOptions};
pub use value::Value;

#[cfg(feature = "pool")]
pub use adapter::{PgAdapter, PgConnection, create_pool, create_pool_with_manager_config};
