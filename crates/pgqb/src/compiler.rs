//! SQL compiler.
//!
//! Walks a [`Query`] depth-first and emits PostgreSQL text into a single
//! buffer. Every value is appended to one shared accumulator and referenced
//! as `$n`, so sub-queries, CTEs and raw fragments all number their
//! placeholders consistently.

mod expr;
mod mutation;
mod predicate;
mod resolve;
mod select;
mod with;

#[cfg(test)]
mod tests;

use crate::error::{QbError, QbResult};
use crate::ident;
use crate::query::{Query, QueryKind};
use crate::value::Value;
use std::fmt::Write;

pub(crate) use resolve::Scope;

/// A compiled statement: SQL text with `$1..$n` placeholders and the
/// positional values they refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    pub text: String,
    pub values: Vec<Value>,
}

impl CompiledSql {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            values: Vec::new(),
        }
    }
}

/// Compile `query`; tables in `default_schema` are not schema-qualified.
pub(crate) fn compile(query: &Query, default_schema: &str) -> QbResult<CompiledSql> {
    let mut ctx = Ctx {
        values: Vec::new(),
        default_schema,
    };
    let mut out = String::new();
    ctx.statement(query, &mut out)?;
    Ok(CompiledSql {
        text: out,
        values: ctx.values,
    })
}

pub(crate) struct Ctx<'a> {
    values: Vec<Value>,
    default_schema: &'a str,
}

impl Ctx<'_> {
    /// Append `value` to the accumulator and return its placeholder.
    pub(crate) fn bind(&mut self, value: Value) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    pub(crate) fn push_bind(&mut self, out: &mut String, value: Value) {
        self.values.push(value);
        let _ = write!(out, "${}", self.values.len());
    }

    /// Quoted table name, schema-qualified unless the schema is the default.
    pub(crate) fn table_name(&self, schema: Option<&str>, name: &str) -> String {
        ident::quote_table(schema.filter(|s| *s != self.default_schema), name)
    }

    pub(crate) fn statement(&mut self, query: &Query, out: &mut String) -> QbResult<()> {
        query.check()?;
        match query.kind {
            QueryKind::Select => self.select(query, out),
            QueryKind::Insert => self.insert(query, out),
            QueryKind::Update => self.update(query, out),
            QueryKind::Delete => self.delete(query, out),
            QueryKind::Truncate => self.truncate(query, out),
            QueryKind::ColumnInfo => self.column_info(query, out),
        }
    }

    /// Table name of a query that must have one.
    pub(crate) fn require_table<'q>(&self, query: &'q Query) -> QbResult<&'q str> {
        query
            .table
            .as_deref()
            .ok_or_else(|| QbError::validation("Query has no table"))
    }
}
