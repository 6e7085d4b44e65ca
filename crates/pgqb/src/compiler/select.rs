//! `SELECT` statements.

use super::{Ctx, Scope};
use crate::error::QbResult;
use crate::expr::SelectItem;
use crate::ident;
use crate::query::{
    FromSource, JoinItem, JoinKind, JoinTarget, LockStrength, LockWait, Query, QueryKind,
    SetOperand,
};
use std::fmt::Write;

impl Ctx<'_> {
    pub(crate) fn select(&mut self, query: &Query, out: &mut String) -> QbResult<()> {
        self.with_clause(query, out)?;
        let scope = Scope::of(query);

        out.push_str("SELECT ");
        match &query.distinct {
            None => {}
            Some(on) if on.is_empty() => out.push_str("DISTINCT "),
            Some(on) => {
                out.push_str("DISTINCT ON (");
                self.expr_list(on, &scope, out)?;
                out.push_str(") ");
            }
        }
        self.select_list(query, &scope, false, out)?;

        out.push_str(" FROM ");
        self.from_clause(query, out)?;
        for item in &query.join {
            self.join(item, &scope, out)?;
        }

        let extra = Self::where_extra(query);
        self.conditions(
            "WHERE",
            &query.where_and,
            &query.where_or,
            &extra,
            &scope,
            out,
        )?;

        if !query.group.is_empty() {
            out.push_str(" GROUP BY ");
            self.expr_list(&query.group, &scope, out)?;
        }
        self.conditions(
            "HAVING",
            &query.having_and,
            &query.having_or,
            &[],
            &scope,
            out,
        )?;

        for (i, (name, spec)) in query.window.iter().enumerate() {
            out.push_str(if i == 0 { " WINDOW " } else { ", " });
            ident::push_quoted(out, name);
            out.push_str(" AS (");
            self.window_spec(spec, &scope, out)?;
            out.push(')');
        }

        for op in &query.union {
            out.push(' ');
            out.push_str(op.kind.as_sql());
            out.push(' ');
            match &op.operand {
                SetOperand::Query(operand) => {
                    let wrap = !operand.order.is_empty()
                        || operand.emitted_limit().is_some()
                        || operand.offset.is_some()
                        || operand.lock.is_some();
                    if wrap {
                        out.push('(');
                    }
                    self.statement(operand, out)?;
                    if wrap {
                        out.push(')');
                    }
                }
                SetOperand::Raw(raw) => self.raw(raw, &scope, out)?,
            }
        }

        if !query.order.is_empty() {
            out.push_str(" ORDER BY ");
            self.order_list(&query.order, &scope, out)?;
        }

        if let Some(limit) = query.emitted_limit() {
            let _ = write!(out, " LIMIT {limit}");
        }
        if let Some(offset) = query.offset {
            let _ = write!(out, " OFFSET {offset}");
        }

        if let Some(lock) = &query.lock {
            out.push_str(match lock.strength {
                LockStrength::Update => " FOR UPDATE",
                LockStrength::NoKeyUpdate => " FOR NO KEY UPDATE",
                LockStrength::Share => " FOR SHARE",
                LockStrength::KeyShare => " FOR KEY SHARE",
            });
            if !lock.of.is_empty() {
                out.push_str(" OF ");
                out.push_str(&ident::quote_list(lock.of.iter().map(String::as_str)));
            }
            match lock.wait {
                Some(LockWait::NoWait) => out.push_str(" NOWAIT"),
                Some(LockWait::SkipLocked) => out.push_str(" SKIP LOCKED"),
                None => {}
            }
        }
        Ok(())
    }

    /// The select list, or the default list of the query's own columns.
    ///
    /// With `bare_star` (used by `RETURNING`) an all-columns list is emitted
    /// as `*` instead of `"t".*`.
    pub(crate) fn select_list(
        &mut self,
        query: &Query,
        scope: &Scope<'_>,
        bare_star: bool,
        out: &mut String,
    ) -> QbResult<()> {
        let items: &[SelectItem] = if query.kind == QueryKind::Select || query.returning.is_empty()
        {
            &query.select
        } else {
            &query.returning
        };

        let mut written: Vec<&str> = Vec::new();
        if items.is_empty() {
            self.default_columns(query, scope, bare_star, out);
            written.extend(scope.own.keys().filter(|k| {
                scope.own.get(k).is_some_and(|c| !c.hidden)
            }));
        } else {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.select_item(item, scope, out)?;
                written.extend(item.output_name());
            }
        }

        for key in &query.after_select {
            let star = items.is_empty() && scope.own.is_empty();
            if star || written.contains(&key.as_str()) {
                continue;
            }
            out.push_str(", ");
            self.select_item(&SelectItem::new(crate::expr::col(key)), scope, out)?;
        }
        Ok(())
    }

    fn default_columns(&mut self, query: &Query, scope: &Scope<'_>, bare_star: bool, out: &mut String) {
        let shape = scope.own;
        if shape.is_empty() || shape.selects_as_star() {
            if bare_star {
                out.push('*');
            } else {
                ident::push_quoted(out, query.alias());
                out.push_str(".*");
            }
            return;
        }
        let mut first = true;
        for (key, column) in shape.iter().filter(|(_, c)| !c.hidden) {
            if !first {
                out.push_str(", ");
            }
            first = false;
            let db = column.name.as_deref().unwrap_or(key);
            out.push_str(&ident::quote_column(Some(scope.alias), db));
            if db != key {
                out.push_str(" AS ");
                ident::push_quoted(out, key);
            }
        }
    }

    fn from_clause(&mut self, query: &Query, out: &mut String) -> QbResult<()> {
        let alias = query.alias();
        match &query.from {
            None => {
                let table = self.require_table(query)?;
                if query.only {
                    out.push_str("ONLY ");
                }
                out.push_str(&self.table_name(query.schema.as_deref(), table));
                if alias != table {
                    out.push_str(" AS ");
                    ident::push_quoted(out, alias);
                }
            }
            Some(FromSource::Query(source)) => match source.table.as_deref() {
                Some(table) if source.is_trivial() => {
                    if query.only {
                        out.push_str("ONLY ");
                    }
                    out.push_str(&self.table_name(source.schema.as_deref(), table));
                    if alias != table {
                        out.push_str(" AS ");
                        ident::push_quoted(out, alias);
                    }
                }
                _ => {
                    out.push('(');
                    self.statement(source, out)?;
                    out.push_str(") AS ");
                    ident::push_quoted(out, alias);
                }
            },
            Some(FromSource::Raw(raw)) => {
                self.raw(raw, &Scope::of(query), out)?;
                out.push_str(" AS ");
                ident::push_quoted(out, alias);
            }
        }
        Ok(())
    }

    pub(crate) fn join_target(
        &mut self,
        target: &JoinTarget,
        alias: Option<&str>,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        match target {
            JoinTarget::Table { name, schema } => {
                out.push_str(&self.table_name(schema.as_deref(), name));
                if let Some(alias) = alias.filter(|a| *a != name.as_str()) {
                    out.push_str(" AS ");
                    ident::push_quoted(out, alias);
                }
            }
            JoinTarget::Query(query) => {
                out.push('(');
                self.statement(query, out)?;
                out.push_str(") AS ");
                ident::push_quoted(out, alias.unwrap_or(query.alias()));
            }
            JoinTarget::Raw(raw) => {
                self.raw(raw, scope, out)?;
                if let Some(alias) = alias {
                    out.push_str(" AS ");
                    ident::push_quoted(out, alias);
                }
            }
        }
        Ok(())
    }

    fn join(&mut self, item: &JoinItem, scope: &Scope<'_>, out: &mut String) -> QbResult<()> {
        out.push(' ');
        out.push_str(item.kind.as_sql());
        out.push(' ');
        self.join_target(&item.target, item.alias.as_deref(), scope, out)?;
        if item.kind == JoinKind::Cross {
            return Ok(());
        }
        out.push_str(" ON ");
        if item.on.is_empty() {
            out.push_str("true");
        } else {
            self.and_list(&item.on, scope, out)?;
        }
        Ok(())
    }
}
