//! Predicate trees for `WHERE`, `HAVING`, `ON` and `FILTER (WHERE ...)`.

use crate::expr::{Expr, IntoExpr, col};
use crate::query::Query;
use crate::raw::RawSql;
use crate::value::Value;
use std::sync::Arc;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
    /// `ILIKE`
    ILike,
    /// `NOT ILIKE`
    NotILike,
    /// `@>` (json/array containment)
    Contains,
    /// `<@`
    ContainedBy,
    /// `&&` (array overlap)
    Overlaps,
}

impl Op {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
            Op::ILike => "ILIKE",
            Op::NotILike => "NOT ILIKE",
            Op::Contains => "@>",
            Op::ContainedBy => "<@",
            Op::Overlaps => "&&",
        }
    }
}

/// Right-hand side of `IN`.
#[derive(Debug, Clone)]
pub enum InList {
    Values(Vec<Expr>),
    Query(Arc<Query>),
}

/// A boolean condition.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare {
        left: Expr,
        op: Op,
        right: Expr,
    },
    In {
        left: Expr,
        list: InList,
        negated: bool,
    },
    Between {
        expr: Expr,
        low: Expr,
        high: Expr,
        negated: bool,
    },
    Null {
        expr: Expr,
        negated: bool,
    },
    Exists {
        query: Arc<Query>,
        negated: bool,
    },
    Not(Box<Predicate>),
    /// AND-joined, always parenthesized.
    Group(Vec<Predicate>),
    /// OR of AND-groups, always parenthesized.
    Any(Vec<Vec<Predicate>>),
    Raw(RawSql),
    Bool(bool),
}

impl Predicate {
    pub fn compare(left: impl IntoExpr, op: Op, right: impl Into<Expr>) -> Self {
        Predicate::Compare {
            left: left.into_expr(),
            op,
            right: right.into(),
        }
    }

    pub fn op(column: impl IntoExpr, op: Op, value: impl Into<Value>) -> Self {
        Self::compare(column, op, Expr::Value(value.into()))
    }

    pub fn eq(column: impl IntoExpr, value: impl Into<Value>) -> Self {
        Self::op(column, Op::Eq, value)
    }

    pub fn ne(column: impl IntoExpr, value: impl Into<Value>) -> Self {
        Self::op(column, Op::Ne, value)
    }

    /// `left = right` between two columns.
    pub fn columns(left: &str, op: Op, right: &str) -> Self {
        Self::compare(left, op, col(right))
    }

    pub fn in_list<V: Into<Value>>(column: impl IntoExpr, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In {
            left: column.into_expr(),
            list: InList::Values(values.into_iter().map(|v| Expr::Value(v.into())).collect()),
            negated: false,
        }
    }

    pub fn in_query(column: impl IntoExpr, query: Query) -> Self {
        Predicate::In {
            left: column.into_expr(),
            list: InList::Query(Arc::new(query)),
            negated: false,
        }
    }

    pub fn between(column: impl IntoExpr, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Predicate::Between {
            expr: column.into_expr(),
            low: Expr::Value(low.into()),
            high: Expr::Value(high.into()),
            negated: false,
        }
    }

    pub fn is_null(column: impl IntoExpr) -> Self {
        Predicate::Null {
            expr: column.into_expr(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl IntoExpr) -> Self {
        Predicate::Null {
            expr: column.into_expr(),
            negated: true,
        }
    }

    pub fn exists(query: Query) -> Self {
        Predicate::Exists {
            query: Arc::new(query),
            negated: false,
        }
    }

    pub fn raw(raw: RawSql) -> Self {
        Predicate::Raw(raw)
    }

    /// Logical negation. `IN`, `BETWEEN`, `IS NULL` and `EXISTS` flip their
    /// own keyword instead of wrapping in `NOT (...)`.
    pub fn negate(self) -> Self {
        match self {
            Predicate::In {
                left,
                list,
                negated,
            } => Predicate::In {
                left,
                list,
                negated: !negated,
            },
            Predicate::Between {
                expr,
                low,
                high,
                negated,
            } => Predicate::Between {
                expr,
                low,
                high,
                negated: !negated,
            },
            Predicate::Null { expr, negated } => Predicate::Null {
                expr,
                negated: !negated,
            },
            Predicate::Exists { query, negated } => Predicate::Exists {
                query,
                negated: !negated,
            },
            Predicate::Not(inner) => *inner,
            Predicate::Bool(b) => Predicate::Bool(!b),
            other => Predicate::Not(Box::new(other)),
        }
    }
}

/// Capability handed to `where_group`, `or_group`, `where_not`, join `ON`
/// callbacks and `having_group`.
///
/// It only accumulates predicates; it cannot execute or reshape the query.
#[derive(Debug, Clone, Default)]
pub struct WhereBuilder {
    pub(crate) and: Vec<Predicate>,
    pub(crate) or: Vec<Vec<Predicate>>,
}

/// `ON` conditions of a join use the same capability.
pub type JoinOn = WhereBuilder;

impl WhereBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, predicate: Predicate) -> Self {
        self.and.push(predicate);
        self
    }

    pub fn eq(self, column: impl IntoExpr, value: impl Into<Value>) -> Self {
        self.push(Predicate::eq(column, value))
    }

    pub fn ne(self, column: impl IntoExpr, value: impl Into<Value>) -> Self {
        self.push(Predicate::ne(column, value))
    }

    pub fn op(self, column: impl IntoExpr, op: Op, value: impl Into<Value>) -> Self {
        self.push(Predicate::op(column, op, value))
    }

    pub fn gt(self, column: impl IntoExpr, value: impl Into<Value>) -> Self {
        self.op(column, Op::Gt, value)
    }

    pub fn gte(self, column: impl IntoExpr, value: impl Into<Value>) -> Self {
        self.op(column, Op::Gte, value)
    }

    pub fn lt(self, column: impl IntoExpr, value: impl Into<Value>) -> Self {
        self.op(column, Op::Lt, value)
    }

    pub fn lte(self, column: impl IntoExpr, value: impl Into<Value>) -> Self {
        self.op(column, Op::Lte, value)
    }

    pub fn like(self, column: impl IntoExpr, pattern: impl Into<Value>) -> Self {
        self.op(column, Op::Like, pattern)
    }

    pub fn ilike(self, column: impl IntoExpr, pattern: impl Into<Value>) -> Self {
        self.op(column, Op::ILike, pattern)
    }

    pub fn in_list<V: Into<Value>>(
        self,
        column: impl IntoExpr,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.push(Predicate::in_list(column, values))
    }

    pub fn not_in<V: Into<Value>>(
        self,
        column: impl IntoExpr,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.push(Predicate::in_list(column, values).negate())
    }

    pub fn between(
        self,
        column: impl IntoExpr,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push(Predicate::between(column, low, high))
    }

    pub fn is_null(self, column: impl IntoExpr) -> Self {
        self.push(Predicate::is_null(column))
    }

    pub fn is_not_null(self, column: impl IntoExpr) -> Self {
        self.push(Predicate::is_not_null(column))
    }

    pub fn exists(self, query: Query) -> Self {
        self.push(Predicate::exists(query))
    }

    pub fn raw(self, raw: RawSql) -> Self {
        self.push(Predicate::Raw(raw))
    }

    /// Column-to-column comparison: `on("posts.user_id", "users.id")`.
    pub fn on(self, left: &str, right: &str) -> Self {
        self.push(Predicate::columns(left, Op::Eq, right))
    }

    pub fn on_op(self, left: &str, op: Op, right: &str) -> Self {
        self.push(Predicate::columns(left, op, right))
    }

    /// Nested, parenthesized AND-group.
    pub fn group(self, f: impl FnOnce(WhereBuilder) -> WhereBuilder) -> Self {
        match f(WhereBuilder::new()).into_predicate() {
            Some(p) => self.push(p),
            None => self,
        }
    }

    pub fn not(self, f: impl FnOnce(WhereBuilder) -> WhereBuilder) -> Self {
        match f(WhereBuilder::new()).into_predicate() {
            Some(p) => self.push(Predicate::Not(Box::new(p))),
            None => self,
        }
    }

    /// Start a new OR-group inside this builder.
    pub fn or(mut self, f: impl FnOnce(WhereBuilder) -> WhereBuilder) -> Self {
        let group = f(WhereBuilder::new()).into_and_list();
        if !group.is_empty() {
            self.or.push(group);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.and.is_empty() && self.or.is_empty()
    }

    /// Collapse to one predicate; `None` when nothing was added.
    pub(crate) fn into_predicate(self) -> Option<Predicate> {
        if self.or.is_empty() {
            if self.and.is_empty() {
                return None;
            }
            return Some(Predicate::Group(self.and));
        }
        let mut groups = Vec::with_capacity(self.or.len() + 1);
        if !self.and.is_empty() {
            groups.push(self.and);
        }
        groups.extend(self.or);
        Some(Predicate::Any(groups))
    }

    /// Flatten to a single AND list (OR groups become one nested predicate).
    pub(crate) fn into_and_list(self) -> Vec<Predicate> {
        if self.or.is_empty() {
            return self.and;
        }
        self.into_predicate().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negate_flips_keywords() {
        assert!(matches!(
            Predicate::in_list("id", [1, 2]).negate(),
            Predicate::In { negated: true, .. }
        ));
        assert!(matches!(
            Predicate::is_null("a").negate(),
            Predicate::Null { negated: true, .. }
        ));
        assert!(matches!(
            Predicate::eq("a", 1).negate(),
            Predicate::Not(_)
        ));
        assert!(matches!(
            Predicate::eq("a", 1).negate().negate(),
            Predicate::Compare { op: Op::Eq, .. }
        ));
    }

    #[test]
    fn builder_collapses() {
        assert!(WhereBuilder::new().into_predicate().is_none());
        assert!(matches!(
            WhereBuilder::new().eq("a", 1).into_predicate(),
            Some(Predicate::Group(ref list)) if list.len() == 1
        ));
        let any = WhereBuilder::new()
            .eq("a", 1)
            .or(|w| w.eq("b", 2).eq("c", 3))
            .into_predicate();
        assert!(matches!(any, Some(Predicate::Any(ref groups)) if groups.len() == 2));
    }

    #[test]
    fn empty_nested_groups_are_dropped() {
        let w = WhereBuilder::new().group(|w| w).not(|w| w).or(|w| w);
        assert!(w.is_empty());
    }
}
