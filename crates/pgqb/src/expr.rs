//! Expression nodes.
//!
//! Everything the compiler emits is built from these leaves: column
//! references, raw SQL fragments, sub-queries and literal values, plus the
//! function-call and arithmetic forms needed for aggregates, window functions
//! and `SET "n" = "n" + $1` updates.

use crate::ident;
use crate::predicate::Predicate;
use crate::query::Query;
use crate::raw::RawSql;
use crate::value::Value;
use std::sync::Arc;

/// A reference to a column, optionally qualified by a table or alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    /// Parse `column` or `table.column`.
    pub fn parse(name: &str) -> Self {
        let (table, column) = ident::split_qualified(name);
        Self {
            table: table.map(str::to_string),
            name: column.to_string(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }
}

/// An expression node.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Column reference, resolved against the selectable set at compile time.
    Column(ColumnRef),
    /// `*` or `"t".*`.
    Star(Option<String>),
    /// A literal bound as a positional parameter.
    Value(Value),
    /// Pre-escaped SQL emitted verbatim (values inside are still bound).
    Raw(RawSql),
    /// A nested query used as a scalar or row source.
    SubQuery(Arc<Query>),
    /// Function / aggregate / window function call.
    Func(Box<FuncCall>),
    /// `expr::type`
    Cast(Box<Expr>, String),
    /// `excluded."col"` inside `ON CONFLICT DO UPDATE`.
    Excluded(String),
    /// `left <op> right` for arithmetic and string concatenation.
    Binary(Box<Expr>, &'static str, Box<Expr>),
}

/// A function call such as `count(*)`, `sum("t"."x") FILTER (WHERE ...)` or
/// `row_number() OVER (PARTITION BY ...)`.
#[derive(Debug, Clone)]
pub struct FuncCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub distinct: bool,
    pub order: Vec<OrderItem>,
    pub filter: Vec<Predicate>,
    pub over: Option<Over>,
}

/// Target of an `OVER` clause.
#[derive(Debug, Clone)]
pub enum Over {
    /// Reference to a window declared with [`Query::window`].
    Named(String),
    /// An inline window specification.
    Spec(WindowSpec),
}

/// `PARTITION BY ... ORDER BY ...`
#[derive(Debug, Clone, Default)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order: Vec<OrderItem>,
}

impl WindowSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition_by(mut self, expr: impl IntoExpr) -> Self {
        self.partition_by.push(expr.into_expr());
        self
    }

    pub fn order(mut self, expr: impl IntoExpr) -> Self {
        self.order.push(OrderItem::asc(expr.into_expr()));
        self
    }

    pub fn order_desc(mut self, expr: impl IntoExpr) -> Self {
        self.order.push(OrderItem::desc(expr.into_expr()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nulls {
    First,
    Last,
}

/// One `ORDER BY` item.
#[derive(Debug, Clone)]
pub struct OrderItem {
    pub expr: Expr,
    pub dir: SortDir,
    pub nulls: Option<Nulls>,
}

impl OrderItem {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Asc,
            nulls: None,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Desc,
            nulls: None,
        }
    }

    pub fn nulls(mut self, nulls: Nulls) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

/// One item of a select or returning list.
#[derive(Debug, Clone)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    /// Output column name of this item, when it can be known statically.
    pub(crate) fn output_name(&self) -> Option<&str> {
        match (&self.alias, &self.expr) {
            (Some(alias), _) => Some(alias),
            (None, Expr::Column(c)) if c.name != "*" => Some(&c.name),
            (None, Expr::Func(f)) => Some(&f.name),
            _ => None,
        }
    }
}

/// Conversion into an expression where a bare string means a column name.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for &str {
    fn into_expr(self) -> Expr {
        col(self)
    }
}

impl IntoExpr for String {
    fn into_expr(self) -> Expr {
        col(&self)
    }
}

impl IntoExpr for &String {
    fn into_expr(self) -> Expr {
        col(self)
    }
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for ColumnRef {
    fn into_expr(self) -> Expr {
        Expr::Column(self)
    }
}

impl IntoExpr for RawSql {
    fn into_expr(self) -> Expr {
        Expr::Raw(self)
    }
}

impl IntoExpr for Query {
    fn into_expr(self) -> Expr {
        Expr::SubQuery(Arc::new(self))
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Value(v)
    }
}

impl From<RawSql> for Expr {
    fn from(raw: RawSql) -> Self {
        Expr::Raw(raw)
    }
}

impl From<Query> for Expr {
    fn from(q: Query) -> Self {
        Expr::SubQuery(Arc::new(q))
    }
}

impl From<ColumnRef> for Expr {
    fn from(c: ColumnRef) -> Self {
        Expr::Column(c)
    }
}

/// Column reference: `col("name")` or `col("t.name")`.
pub fn col(name: &str) -> Expr {
    if name == "*" {
        return Expr::Star(None);
    }
    if let Some(table) = name.strip_suffix(".*") {
        return Expr::Star(Some(table.to_string()));
    }
    Expr::Column(ColumnRef::parse(name))
}

/// A literal value bound as a parameter.
pub fn val(value: impl Into<Value>) -> Expr {
    Expr::Value(value.into())
}

/// Generic function call.
pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Func(Box::new(FuncCall {
        name: name.into(),
        args,
        distinct: false,
        order: Vec::new(),
        filter: Vec::new(),
        over: None,
    }))
}

/// `count(*)`
pub fn count() -> Expr {
    func("count", vec![Expr::Star(None)])
}

/// `count(expr)`
pub fn count_of(expr: impl IntoExpr) -> Expr {
    func("count", vec![expr.into_expr()])
}

pub fn sum(expr: impl IntoExpr) -> Expr {
    func("sum", vec![expr.into_expr()])
}

pub fn avg(expr: impl IntoExpr) -> Expr {
    func("avg", vec![expr.into_expr()])
}

pub fn min(expr: impl IntoExpr) -> Expr {
    func("min", vec![expr.into_expr()])
}

pub fn max(expr: impl IntoExpr) -> Expr {
    func("max", vec![expr.into_expr()])
}

pub fn row_number() -> Expr {
    func("row_number", Vec::new())
}

pub fn rank() -> Expr {
    func("rank", Vec::new())
}

impl Expr {
    fn map_func(self, f: impl FnOnce(&mut FuncCall)) -> Self {
        match self {
            Expr::Func(mut call) => {
                f(&mut call);
                Expr::Func(call)
            }
            other => other,
        }
    }

    /// `OVER "name"` for function calls; other expressions are returned unchanged.
    pub fn over(self, window: impl Into<String>) -> Self {
        let name = window.into();
        self.map_func(|c| c.over = Some(Over::Named(name)))
    }

    /// `OVER (PARTITION BY ... ORDER BY ...)`
    pub fn over_spec(self, spec: WindowSpec) -> Self {
        self.map_func(|c| c.over = Some(Over::Spec(spec)))
    }

    /// `fn(DISTINCT ...)`
    pub fn distinct(self) -> Self {
        self.map_func(|c| c.distinct = true)
    }

    /// `fn(...) FILTER (WHERE ...)`
    pub fn filter(self, predicate: Predicate) -> Self {
        self.map_func(|c| c.filter.push(predicate))
    }

    /// `fn(... ORDER BY ...)` for ordered aggregates.
    pub fn order_within(self, item: OrderItem) -> Self {
        self.map_func(|c| c.order.push(item))
    }

    pub fn cast(self, sql_type: impl Into<String>) -> Self {
        Expr::Cast(Box::new(self), sql_type.into())
    }

    pub fn add(self, other: impl Into<Expr>) -> Self {
        Expr::Binary(Box::new(self), "+", Box::new(other.into()))
    }

    pub fn sub(self, other: impl Into<Expr>) -> Self {
        Expr::Binary(Box::new(self), "-", Box::new(other.into()))
    }

    pub fn concat(self, other: impl Into<Expr>) -> Self {
        Expr::Binary(Box::new(self), "||", Box::new(other.into()))
    }
}
