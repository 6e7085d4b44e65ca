//! `WITH` clauses.

use super::{Ctx, Scope};
use crate::error::QbResult;
use crate::ident;
use crate::query::{Query, WithBody};

impl Ctx<'_> {
    /// Emit `WITH [RECURSIVE] "a" AS (...), ... ` (with trailing space).
    pub(crate) fn with_clause(&mut self, query: &Query, out: &mut String) -> QbResult<()> {
        if query.with.is_empty() {
            return Ok(());
        }
        out.push_str("WITH ");
        if query.with.iter().any(|item| item.recursive) {
            out.push_str("RECURSIVE ");
        }

        let scope = Scope::of(query);
        for (i, item) in query.with.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            ident::push_quoted(out, &item.name);
            if let Some(columns) = &item.columns {
                out.push_str(" (");
                out.push_str(&ident::quote_list(columns.iter().map(String::as_str)));
                out.push(')');
            }
            out.push_str(" AS ");
            match item.materialized {
                Some(true) => out.push_str("MATERIALIZED "),
                Some(false) => out.push_str("NOT MATERIALIZED "),
                None => {}
            }
            out.push('(');
            match &item.body {
                WithBody::Query(body) => self.statement(body, out)?,
                WithBody::Raw(raw) => self.raw(raw, &scope, out)?,
                WithBody::Recursive {
                    base,
                    step,
                    union_all,
                } => {
                    self.statement(base, out)?;
                    out.push_str(if *union_all { " UNION ALL " } else { " UNION " });
                    self.statement(step, out)?;
                }
            }
            out.push(')');
        }
        out.push(' ');
        Ok(())
    }
}
