//! Query descriptor and builder API.
//!
//! A [`Query`] accumulates clauses through consuming builder calls
//! (`fn op(self, ..) -> Self`). Nothing runs until a terminal such as
//! [`Query::run`] or [`Query::fetch_all`] is awaited.
//!
//! Descriptors are plain values: `Clone` copies every clause list, and
//! embedded sub-queries are shared behind `Arc` and never mutated in place.
//! Keep a base query around by cloning it before extending:
//!
//! ```ignore
//! let active = users.query().where_eq("active", true);
//! let admins = active.clone().where_eq("role", "admin");
//! let first_ten = active.clone().order("id").limit(10);
//! ```
//!
//! Invalid builder arguments do not panic. The first one is recorded on the
//! descriptor and returned as [`QbError::Validation`] by [`Query::to_sql`]
//! and by every terminal, before any SQL is sent.

mod exec;
mod filter;
mod hooks;
mod merge;
mod mutation;
mod or_create;
mod select;

#[cfg(test)]
mod tests;

pub use exec::Outcome;
pub use hooks::{AfterHook, BeforeHook, HookPhase, Hooks};
pub use mutation::CreateData;
pub use select::JoinSource;

use crate::column::{ColumnDefault, Shape, ValueFn};
use crate::compiler::{self, CompiledSql};
use crate::config::DEFAULT_SCHEMA;
use crate::error::{QbError, QbResult};
use crate::expr::{Expr, OrderItem, SelectItem, WindowSpec};
use crate::logger::Logger;
use crate::predicate::{Predicate, WhereBuilder};
use crate::raw::RawSql;
use crate::record::Data;
use crate::table::Table;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Statement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryKind {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
    Truncate,
    ColumnInfo,
}

/// How results are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    #[default]
    All,
    One,
    OneOrThrow,
    Value,
    ValueOrThrow,
    Rows,
    Pluck,
    RowCount,
    Void,
}

impl ReturnType {
    /// Return types that read at most one row.
    pub fn is_single(self) -> bool {
        matches!(
            self,
            ReturnType::One | ReturnType::OneOrThrow | ReturnType::Value | ReturnType::ValueOrThrow
        )
    }

    pub(crate) fn uses_arrays(self) -> bool {
        matches!(
            self,
            ReturnType::Rows | ReturnType::Pluck | ReturnType::Value | ReturnType::ValueOrThrow
        )
    }
}

/// Row source replacing the table in `FROM`.
#[derive(Debug, Clone)]
pub enum FromSource {
    Query(Arc<Query>),
    Raw(RawSql),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    Lateral,
    LeftLateral,
}

impl JoinKind {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Cross => "CROSS JOIN",
            JoinKind::Lateral => "JOIN LATERAL",
            JoinKind::LeftLateral => "LEFT JOIN LATERAL",
        }
    }
}

/// What a join (or `USING` / `UPDATE ... FROM` item) refers to.
#[derive(Debug, Clone)]
pub enum JoinTarget {
    Table {
        name: String,
        schema: Option<String>,
    },
    Query(Arc<Query>),
    Raw(RawSql),
}

impl From<&str> for JoinTarget {
    fn from(name: &str) -> Self {
        JoinTarget::Table {
            name: name.to_string(),
            schema: None,
        }
    }
}

impl From<String> for JoinTarget {
    fn from(name: String) -> Self {
        JoinTarget::Table { name, schema: None }
    }
}

impl From<&Table> for JoinTarget {
    fn from(table: &Table) -> Self {
        JoinTarget::Table {
            name: table.name.clone(),
            schema: table.schema.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinItem {
    pub kind: JoinKind,
    pub target: JoinTarget,
    pub alias: Option<String>,
    pub on: Vec<Predicate>,
}

impl JoinItem {
    /// Name the joined source is referenced by.
    pub(crate) fn reference(&self) -> Option<&str> {
        match (&self.alias, &self.target) {
            (Some(alias), _) => Some(alias),
            (None, JoinTarget::Table { name, .. }) => Some(name),
            (None, JoinTarget::Query(q)) => Some(q.alias()),
            (None, JoinTarget::Raw(_)) => None,
        }
    }
}

/// Body of a CTE.
#[derive(Debug, Clone)]
pub enum WithBody {
    Query(Arc<Query>),
    Raw(RawSql),
    /// `base UNION [ALL] step`
    Recursive {
        base: Arc<Query>,
        step: Arc<Query>,
        union_all: bool,
    },
}

#[derive(Debug, Clone)]
pub struct WithItem {
    pub name: String,
    pub columns: Option<Vec<String>>,
    pub recursive: bool,
    /// `Some(true)` → `MATERIALIZED`, `Some(false)` → `NOT MATERIALIZED`.
    pub materialized: Option<bool>,
    pub body: WithBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    UnionAll,
    Intersect,
    IntersectAll,
    Except,
    ExceptAll,
}

impl SetOpKind {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            SetOpKind::Union => "UNION",
            SetOpKind::UnionAll => "UNION ALL",
            SetOpKind::Intersect => "INTERSECT",
            SetOpKind::IntersectAll => "INTERSECT ALL",
            SetOpKind::Except => "EXCEPT",
            SetOpKind::ExceptAll => "EXCEPT ALL",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SetOperand {
    Query(Arc<Query>),
    Raw(RawSql),
}

#[derive(Debug, Clone)]
pub struct SetOp {
    pub kind: SetOpKind,
    pub operand: SetOperand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrength {
    Update,
    NoKeyUpdate,
    Share,
    KeyShare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    NoWait,
    SkipLocked,
}

/// Row-locking clause: `FOR UPDATE [OF ...] [NOWAIT | SKIP LOCKED]`.
#[derive(Debug, Clone)]
pub struct Lock {
    pub strength: LockStrength,
    pub of: Vec<String>,
    pub wait: Option<LockWait>,
}

/// Insert payload.
#[derive(Debug, Clone)]
pub enum InsertSource {
    /// `VALUES (...), (...)`
    Rows(Vec<Data>),
    /// `SELECT <query columns>, <extra values>` from a single-row query.
    Query { query: Arc<Query>, extra: Data },
    /// `SELECT <values> WHERE NOT EXISTS (SELECT 1 FROM "<cte>")`
    Conditional { data: Data, cte: String },
}

#[derive(Debug, Clone)]
pub enum ConflictTarget {
    Any,
    Columns(Vec<String>),
    Constraint(String),
}

#[derive(Debug, Clone)]
pub enum ConflictAction {
    Nothing,
    /// Overwrite with `excluded` values; `None` means every inserted column
    /// outside the conflict target.
    Merge(Option<Vec<String>>),
    Set(Data),
}

#[derive(Debug, Clone)]
pub struct OnConflict {
    pub target: ConflictTarget,
    pub action: ConflictAction,
}

/// The query descriptor.
#[derive(Clone)]
pub struct Query {
    pub(crate) table: Option<String>,
    pub(crate) schema: Option<String>,
    pub(crate) as_: Option<String>,
    pub(crate) from: Option<FromSource>,
    pub(crate) only: bool,
    pub(crate) shape: Arc<Shape>,
    pub(crate) parsers: BTreeMap<String, ValueFn>,
    pub(crate) defaults: BTreeMap<String, ColumnDefault>,
    pub(crate) joined_shapes: Vec<(String, Arc<Shape>)>,
    pub(crate) with_shapes: Vec<(String, Arc<Shape>)>,
    pub(crate) select: Vec<SelectItem>,
    pub(crate) distinct: Option<Vec<Expr>>,
    pub(crate) where_and: Vec<Predicate>,
    pub(crate) where_or: Vec<Vec<Predicate>>,
    pub(crate) having_and: Vec<Predicate>,
    pub(crate) having_or: Vec<Vec<Predicate>>,
    pub(crate) join: Vec<JoinItem>,
    pub(crate) with: Vec<WithItem>,
    pub(crate) group: Vec<Expr>,
    pub(crate) order: Vec<OrderItem>,
    pub(crate) window: Vec<(String, WindowSpec)>,
    pub(crate) union: Vec<SetOp>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) lock: Option<Lock>,
    pub(crate) kind: QueryKind,
    pub(crate) insert: Option<InsertSource>,
    pub(crate) update: Vec<(String, Expr)>,
    pub(crate) on_conflict: Option<OnConflict>,
    pub(crate) returning: Vec<SelectItem>,
    pub(crate) using: Vec<JoinTarget>,
    pub(crate) restart_identity: bool,
    pub(crate) cascade: bool,
    pub(crate) column: Option<String>,
    pub(crate) all_rows: bool,
    pub(crate) hard_delete: bool,
    pub(crate) soft_delete: Option<String>,
    pub(crate) return_type: ReturnType,
    /// `return_type` was chosen by a builder call, so it wins a merge even
    /// when it equals the default.
    pub(crate) return_type_set: bool,
    pub(crate) hooks: Hooks,
    pub(crate) after_select: Vec<String>,
    pub(crate) log: Option<Logger>,
    pub(crate) wrap_in_transaction: bool,
    pub(crate) throw_on_not_found: bool,
    pub(crate) coalesce_value: Option<Value>,
    pub(crate) not_found_default: Option<Value>,
    pub(crate) none: bool,
    pub(crate) scope_defs: BTreeMap<String, Vec<Predicate>>,
    pub(crate) scopes: BTreeMap<String, Vec<Predicate>>,
    pub(crate) auto_prepared_statements: Option<bool>,
    pub(crate) error: Option<String>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("table", &self.table)
            .field("as", &self.as_)
            .field("kind", &self.kind)
            .field("return_type", &self.return_type)
            .field("select", &self.select.len())
            .field("where_and", &self.where_and.len())
            .field("where_or", &self.where_or.len())
            .field("join", &self.join.len())
            .field("none", &self.none)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Default for Query {
    fn default() -> Self {
        Self {
            table: None,
            schema: None,
            as_: None,
            from: None,
            only: false,
            shape: Arc::new(Shape::new()),
            parsers: BTreeMap::new(),
            defaults: BTreeMap::new(),
            joined_shapes: Vec::new(),
            with_shapes: Vec::new(),
            select: Vec::new(),
            distinct: None,
            where_and: Vec::new(),
            where_or: Vec::new(),
            having_and: Vec::new(),
            having_or: Vec::new(),
            join: Vec::new(),
            with: Vec::new(),
            group: Vec::new(),
            order: Vec::new(),
            window: Vec::new(),
            union: Vec::new(),
            limit: None,
            offset: None,
            lock: None,
            kind: QueryKind::Select,
            insert: None,
            update: Vec::new(),
            on_conflict: None,
            returning: Vec::new(),
            using: Vec::new(),
            restart_identity: false,
            cascade: false,
            column: None,
            all_rows: false,
            hard_delete: false,
            soft_delete: None,
            return_type: ReturnType::All,
            return_type_set: false,
            hooks: Hooks::default(),
            after_select: Vec::new(),
            log: None,
            wrap_in_transaction: false,
            throw_on_not_found: false,
            coalesce_value: None,
            not_found_default: None,
            none: false,
            scope_defs: BTreeMap::new(),
            scopes: BTreeMap::new(),
            auto_prepared_statements: None,
            error: None,
        }
    }
}

impl Query {
    /// An empty descriptor with no source; useful as the right side of `merge`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A select over a table without declared columns.
    pub fn table(name: impl Into<String>) -> Self {
        let name = name.into();
        let query = Self {
            table: Some(name.clone()),
            ..Self::default()
        };
        query.check_ident(&name)
    }

    /// A select over a declared table, with its scopes and hooks.
    pub fn from_table(table: &Table) -> Self {
        let mut query = Self::table(table.name.clone());
        query.schema = table.schema.clone();
        query.shape = table.shape.clone();
        query.soft_delete = table.soft_delete.clone();
        query.hooks = table.hooks.clone();
        query.scope_defs = table.scopes.clone();
        for name in &table.default_scopes {
            if let Some(predicates) = table.scopes.get(name) {
                query.scopes.insert(name.clone(), predicates.clone());
            }
        }
        query
    }

    /// The alias the query's own source is referenced by.
    pub fn alias(&self) -> &str {
        self.as_
            .as_deref()
            .or(self.table.as_deref())
            .unwrap_or("t")
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// The `LIMIT` a select compiles with: the explicit one, or 1 for
    /// single-row return types.
    pub(crate) fn emitted_limit(&self) -> Option<u64> {
        let single_row = matches!(self.return_type, ReturnType::One | ReturnType::OneOrThrow);
        self.limit
            .or((single_row && self.kind == QueryKind::Select).then_some(1))
    }

    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn is_none(&self) -> bool {
        self.none
    }

    /// Compile to SQL text and positional values, using `public` as the
    /// default schema.
    pub fn to_sql(&self) -> QbResult<CompiledSql> {
        self.to_sql_in(DEFAULT_SCHEMA)
    }

    /// Compile with an explicit default schema.
    pub fn to_sql_in(&self, default_schema: &str) -> QbResult<CompiledSql> {
        self.check()?;
        compiler::compile(self, default_schema)
    }

    /// Surface a recorded builder error.
    pub(crate) fn check(&self) -> QbResult<()> {
        match &self.error {
            Some(message) => Err(QbError::Validation(message.clone())),
            None => Ok(()),
        }
    }

    /// Record a builder error; the first one wins.
    pub(crate) fn fail(mut self, message: impl Into<String>) -> Self {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
        self
    }

    pub(crate) fn check_ident(self, name: &str) -> Self {
        match crate::ident::validate(name) {
            Ok(()) => self,
            Err(e) => self.fail(e.to_string()),
        }
    }

    /// Propagate a sub-query's recorded error into this descriptor.
    pub(crate) fn absorb(self, other: &Query) -> Self {
        match &other.error {
            Some(message) => self.fail(message.clone()),
            None => self,
        }
    }

    /// True when the descriptor is a bare `SELECT` of its table, so it can be
    /// referenced directly instead of as a derived table.
    pub(crate) fn is_trivial(&self) -> bool {
        self.kind == QueryKind::Select
            && self.from.is_none()
            && !self.only
            && self.select.is_empty()
            && self.distinct.is_none()
            && self.where_and.is_empty()
            && self.where_or.is_empty()
            && self.having_and.is_empty()
            && self.having_or.is_empty()
            && self.join.is_empty()
            && self.with.is_empty()
            && self.group.is_empty()
            && self.order.is_empty()
            && self.window.is_empty()
            && self.union.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && self.lock.is_none()
            && self.scopes.is_empty()
            && !self.none
    }

    /// True when an explicit filter was given (scopes do not count).
    pub(crate) fn has_filter(&self) -> bool {
        !self.where_and.is_empty() || !self.where_or.is_empty()
    }

    /// Output shape when this query is used as a row source.
    pub(crate) fn output_shape(&self) -> Arc<Shape> {
        if self.select.is_empty() {
            if self.shape.selects_as_star() {
                return self.shape.clone();
            }
            let mut shape = Shape::new();
            for (key, column) in self.shape.iter().filter(|(_, c)| !c.hidden) {
                shape.insert(key, crate::column::Column { name: None, ..column.clone() });
            }
            return Arc::new(shape);
        }
        let names: Vec<&str> = self.select.iter().filter_map(SelectItem::output_name).collect();
        let mut shape = Shape::new();
        for name in names {
            let column = self.shape.get(name).cloned().unwrap_or_default();
            shape.insert(name, crate::column::Column { name: None, ..column });
        }
        Arc::new(shape)
    }

    // ==================== Misc ====================

    /// Log every statement this query sends.
    pub fn log(mut self, logger: Logger) -> Self {
        self.log = Some(logger);
        self
    }

    /// Run inside a transaction (the current one, or a new one).
    pub fn wrap_in_transaction(mut self) -> Self {
        self.wrap_in_transaction = true;
        self
    }

    /// Use the prepared-statement cache for this query regardless of config.
    pub fn prepared(mut self, enabled: bool) -> Self {
        self.auto_prepared_statements = Some(enabled);
        self
    }

    /// Register a parser applied to `key` in every result row.
    pub fn parse(
        mut self,
        key: impl Into<String>,
        f: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.parsers.insert(key.into(), Arc::new(f));
        self
    }

    /// Default for `key` on create when the payload omits it.
    pub fn default_value(mut self, key: impl Into<String>, default: ColumnDefault) -> Self {
        self.defaults.insert(key.into(), default);
        self
    }
}
