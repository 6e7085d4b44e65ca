//! Expressions, raw fragments, select items and ordering.

use super::{Ctx, Scope};
use crate::error::QbResult;
use crate::expr::{Expr, FuncCall, Nulls, OrderItem, Over, SelectItem, SortDir, WindowSpec};
use crate::ident;
use crate::raw::{NamedVars, RawPart, RawSql};

impl Ctx<'_> {
    pub(crate) fn expr(&mut self, expr: &Expr, scope: &Scope<'_>, out: &mut String) -> QbResult<()> {
        match expr {
            Expr::Column(column) => out.push_str(&scope.resolve(column)?.sql),
            Expr::Star(None) => out.push('*'),
            Expr::Star(Some(table)) => {
                ident::push_quoted(out, table);
                out.push_str(".*");
            }
            Expr::Value(value) => self.push_bind(out, value.clone()),
            Expr::Raw(raw) => self.raw(raw, scope, out)?,
            Expr::SubQuery(query) => {
                out.push('(');
                self.statement(query, out)?;
                out.push(')');
            }
            Expr::Func(call) => self.func(call, scope, out)?,
            Expr::Cast(inner, sql_type) => {
                self.operand(inner, scope, out)?;
                out.push_str("::");
                out.push_str(sql_type);
            }
            Expr::Excluded(key) => {
                out.push_str("excluded.");
                ident::push_quoted(out, scope.db_name(key));
            }
            Expr::Binary(left, op, right) => {
                self.operand(left, scope, out)?;
                out.push(' ');
                out.push_str(op);
                out.push(' ');
                self.operand(right, scope, out)?;
            }
        }
        Ok(())
    }

    /// Nested binary operations and casts are parenthesized.
    fn operand(&mut self, expr: &Expr, scope: &Scope<'_>, out: &mut String) -> QbResult<()> {
        if matches!(expr, Expr::Binary(..)) {
            out.push('(');
            self.expr(expr, scope, out)?;
            out.push(')');
            Ok(())
        } else {
            self.expr(expr, scope, out)
        }
    }

    pub(crate) fn expr_list(
        &mut self,
        exprs: &[Expr],
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expr(expr, scope, out)?;
        }
        Ok(())
    }

    fn func(&mut self, call: &FuncCall, scope: &Scope<'_>, out: &mut String) -> QbResult<()> {
        out.push_str(&call.name);
        out.push('(');
        if call.distinct {
            out.push_str("DISTINCT ");
        }
        self.expr_list(&call.args, scope, out)?;
        if !call.order.is_empty() {
            out.push_str(" ORDER BY ");
            self.order_list(&call.order, scope, out)?;
        }
        out.push(')');

        if !call.filter.is_empty() {
            out.push_str(" FILTER (WHERE ");
            self.and_list(&call.filter, scope, out)?;
            out.push(')');
        }

        match &call.over {
            None => {}
            Some(Over::Named(name)) => {
                out.push_str(" OVER ");
                ident::push_quoted(out, name);
            }
            Some(Over::Spec(spec)) => {
                out.push_str(" OVER (");
                self.window_spec(spec, scope, out)?;
                out.push(')');
            }
        }
        Ok(())
    }

    pub(crate) fn window_spec(
        &mut self,
        spec: &WindowSpec,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        if !spec.partition_by.is_empty() {
            out.push_str("PARTITION BY ");
            self.expr_list(&spec.partition_by, scope, out)?;
        }
        if !spec.order.is_empty() {
            if !spec.partition_by.is_empty() {
                out.push(' ');
            }
            out.push_str("ORDER BY ");
            self.order_list(&spec.order, scope, out)?;
        }
        Ok(())
    }

    pub(crate) fn order_list(
        &mut self,
        items: &[OrderItem],
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expr(&item.expr, scope, out)?;
            if item.dir == SortDir::Desc {
                out.push_str(" DESC");
            }
            match item.nulls {
                Some(Nulls::First) => out.push_str(" NULLS FIRST"),
                Some(Nulls::Last) => out.push_str(" NULLS LAST"),
                None => {}
            }
        }
        Ok(())
    }

    /// A select-list entry; renamed columns get their logical key as alias.
    pub(crate) fn select_item(
        &mut self,
        item: &SelectItem,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        let implicit_alias = match (&item.expr, &item.alias) {
            (Expr::Column(column), None) => {
                let resolved = scope.resolve(column)?;
                out.push_str(&resolved.sql);
                resolved.renamed.then_some(column.name.as_str())
            }
            (expr, _) => {
                self.expr(expr, scope, out)?;
                None
            }
        };
        if let Some(alias) = item.alias.as_deref().or(implicit_alias) {
            out.push_str(" AS ");
            ident::push_quoted(out, alias);
        }
        Ok(())
    }

    /// Emit a raw fragment, binding its values and substituting `$name`
    /// variables when the fragment declares them.
    pub(crate) fn raw(&mut self, raw: &RawSql, scope: &Scope<'_>, out: &mut String) -> QbResult<()> {
        let mut named = raw.vars.as_deref().map(NamedVars::new);
        for part in &raw.parts {
            match part {
                RawPart::Text(text) => match named.as_mut() {
                    Some(vars) => {
                        vars.substitute(text, out, &mut |value| self.bind(value.clone()))?
                    }
                    None => out.push_str(text),
                },
                RawPart::Value(value) => self.push_bind(out, value.clone()),
                RawPart::Expr(expr) => self.expr(expr, scope, out)?,
            }
        }
        match named {
            Some(vars) => vars.finish(),
            None => Ok(()),
        }
    }
}
