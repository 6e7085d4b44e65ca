//! Predicate rendering and the WHERE / HAVING combination policy.

use super::{Ctx, Scope};
use crate::error::QbResult;
use crate::expr::Expr;
use crate::predicate::{InList, Op, Predicate};
use crate::value::Value;

fn is_null_value(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(Value::Null))
}

impl Ctx<'_> {
    /// Render one predicate. `siblings` is true when it is joined with others,
    /// in which case raw fragments are parenthesized.
    pub(crate) fn predicate(
        &mut self,
        predicate: &Predicate,
        scope: &Scope<'_>,
        siblings: bool,
        out: &mut String,
    ) -> QbResult<()> {
        match predicate {
            Predicate::Compare { left, op, right } => {
                self.expr(left, scope, out)?;
                match op {
                    Op::Eq if is_null_value(right) => out.push_str(" IS NULL"),
                    Op::Ne if is_null_value(right) => out.push_str(" IS NOT NULL"),
                    _ => {
                        out.push(' ');
                        out.push_str(op.as_sql());
                        out.push(' ');
                        self.expr(right, scope, out)?;
                    }
                }
            }
            Predicate::In {
                left,
                list,
                negated,
            } => match list {
                InList::Values(values) if values.is_empty() => {
                    out.push_str(if *negated { "true" } else { "false" });
                }
                InList::Values(values) => {
                    self.expr(left, scope, out)?;
                    out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                    self.expr_list(values, scope, out)?;
                    out.push(')');
                }
                InList::Query(query) => {
                    self.expr(left, scope, out)?;
                    out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                    self.statement(query, out)?;
                    out.push(')');
                }
            },
            Predicate::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.expr(expr, scope, out)?;
                out.push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                self.expr(low, scope, out)?;
                out.push_str(" AND ");
                self.expr(high, scope, out)?;
            }
            Predicate::Null { expr, negated } => {
                self.expr(expr, scope, out)?;
                out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Predicate::Exists { query, negated } => {
                out.push_str(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                self.statement(query, out)?;
                out.push(')');
            }
            Predicate::Not(inner) => {
                out.push_str("NOT (");
                self.predicate_bare(inner, scope, out)?;
                out.push(')');
            }
            Predicate::Group(list) => {
                out.push('(');
                self.and_list(list, scope, out)?;
                out.push(')');
            }
            Predicate::Any(groups) => {
                out.push('(');
                self.or_groups(groups.iter().map(Vec::as_slice), scope, out)?;
                out.push(')');
            }
            Predicate::Raw(raw) => {
                if siblings {
                    out.push('(');
                    self.raw(raw, scope, out)?;
                    out.push(')');
                } else {
                    self.raw(raw, scope, out)?;
                }
            }
            Predicate::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
        }
        Ok(())
    }

    /// Inside `NOT (...)`: groups without their own parentheses.
    fn predicate_bare(
        &mut self,
        predicate: &Predicate,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        match predicate {
            Predicate::Group(list) => self.and_list(list, scope, out),
            Predicate::Any(groups) => self.or_groups(groups.iter().map(Vec::as_slice), scope, out),
            other => self.predicate(other, scope, false, out),
        }
    }

    pub(crate) fn and_list(
        &mut self,
        list: &[Predicate],
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        let siblings = list.len() > 1;
        for (i, predicate) in list.iter().enumerate() {
            if i > 0 {
                out.push_str(" AND ");
            }
            self.predicate(predicate, scope, siblings, out)?;
        }
        Ok(())
    }

    /// `a OR (b AND c)`: multi-predicate groups are parenthesized.
    fn or_groups<'p>(
        &mut self,
        groups: impl Iterator<Item = &'p [Predicate]>,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        for (i, group) in groups.enumerate() {
            if i > 0 {
                out.push_str(" OR ");
            }
            if group.len() > 1 {
                out.push('(');
                self.and_list(group, scope, out)?;
                out.push(')');
            } else {
                self.and_list(group, scope, out)?;
            }
        }
        Ok(())
    }

    /// Emit ` <keyword> <conditions>` when there is anything to emit.
    ///
    /// `and` holds the AND list, `or` the OR groups (the AND list acts as the
    /// first group when both are present), and `extra` predicates (scopes,
    /// the `none` guard) are ANDed after the whole base.
    pub(crate) fn conditions(
        &mut self,
        keyword: &str,
        and: &[Predicate],
        or: &[Vec<Predicate>],
        extra: &[Predicate],
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        if and.is_empty() && or.is_empty() && extra.is_empty() {
            return Ok(());
        }
        out.push(' ');
        out.push_str(keyword);
        out.push(' ');

        if or.is_empty() {
            let siblings = and.len() + extra.len() > 1;
            for (i, predicate) in and.iter().chain(extra).enumerate() {
                if i > 0 {
                    out.push_str(" AND ");
                }
                self.predicate(predicate, scope, siblings, out)?;
            }
            return Ok(());
        }

        let groups = (!and.is_empty())
            .then_some(and)
            .into_iter()
            .chain(or.iter().map(Vec::as_slice));
        if extra.is_empty() {
            return self.or_groups(groups, scope, out);
        }

        out.push('(');
        self.or_groups(groups, scope, out)?;
        out.push(')');
        for predicate in extra {
            out.push_str(" AND ");
            self.predicate(predicate, scope, true, out)?;
        }
        Ok(())
    }

    /// Scope predicates plus the `none` guard, ANDed after the user filter.
    pub(crate) fn where_extra(query: &crate::query::Query) -> Vec<Predicate> {
        let mut extra: Vec<Predicate> = query.scopes.values().flatten().cloned().collect();
        if query.none {
            extra.push(Predicate::Bool(false));
        }
        extra
    }
}
