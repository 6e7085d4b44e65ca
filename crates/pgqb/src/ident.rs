//! SQL identifier quoting.
//!
//! Every table, column and alias the compiler emits goes through [`quote`]:
//! the name is wrapped in double quotes and embedded `"` are doubled, so any
//! name (mixed case, reserved words, punctuation) is reproduced exactly.

use crate::error::{QbError, QbResult};
use std::fmt::Write;

/// Quote a single identifier: `user` → `"user"`, `a"b` → `"a""b"`.
pub fn quote(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    push_quoted(&mut out, name);
    out
}

/// Append a quoted identifier to `out`.
pub fn push_quoted(out: &mut String, name: &str) {
    out.push('"');
    for c in name.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
}

/// Quote a table name, qualifying it with `schema` when one is given.
pub fn quote_table(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => {
            let mut out = quote(schema);
            out.push('.');
            push_quoted(&mut out, table);
            out
        }
        None => quote(table),
    }
}

/// Quote a column qualified by its table alias: `"t"."c"`.
pub fn quote_column(table: Option<&str>, column: &str) -> String {
    let mut out = String::new();
    if let Some(table) = table {
        push_quoted(&mut out, table);
        out.push('.');
    }
    if column == "*" {
        out.push('*');
    } else {
        push_quoted(&mut out, column);
    }
    out
}

/// Split `table.column` into its parts; names without a dot have no table.
pub(crate) fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('.') {
        Some((table, column)) if !table.is_empty() && !column.is_empty() => (Some(table), column),
        _ => (None, name),
    }
}

/// Reject identifiers Postgres can never accept, even when quoted.
pub fn validate(name: &str) -> QbResult<()> {
    if name.is_empty() {
        return Err(QbError::validation("Identifier cannot be empty"));
    }
    if name.contains('\0') {
        return Err(QbError::validation(
            "Identifier cannot contain NUL character",
        ));
    }
    Ok(())
}

/// Comma-join quoted identifiers: `"a", "b"`.
pub(crate) fn quote_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for (i, name) in names.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        push_quoted(&mut out, name);
    }
    out
}

/// Render a savepoint name for the given counter value.
pub(crate) fn savepoint_name(n: u32) -> String {
    let mut out = String::new();
    let _ = write!(&mut out, "\"{n}\"");
    out
}
