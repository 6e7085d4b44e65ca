//! Raw SQL fragments.
//!
//! A [`RawSql`] is emitted verbatim by the compiler, but the values it carries
//! are still bound as positional parameters:
//!
//! ```ignore
//! use pgqb::sql;
//!
//! let mut fragment = sql("\"age\" > ");
//! fragment.push_bind(18).push(" AND \"name\" <> ").push_bind("root");
//!
//! // Named variables, substituted at compile time:
//! let named = pgqb::RawSql::named("\"age\" BETWEEN $min AND $max")
//!     .var("min", 18)
//!     .var("max", 65);
//! ```

use crate::error::{QbError, QbResult};
use crate::expr::Expr;
use crate::value::Value;

#[derive(Debug, Clone)]
pub(crate) enum RawPart {
    Text(String),
    Value(Value),
    Expr(Box<Expr>),
}

/// A pre-escaped SQL fragment with embedded values and expressions.
#[derive(Debug, Clone, Default)]
pub struct RawSql {
    pub(crate) parts: Vec<RawPart>,
    /// Named variables; `None` disables `$name` substitution entirely.
    pub(crate) vars: Option<Vec<(String, Value)>>,
}

/// Start a raw SQL fragment.
pub fn sql(text: impl Into<String>) -> RawSql {
    RawSql::new(text)
}

impl RawSql {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let parts = if text.is_empty() {
            Vec::new()
        } else {
            vec![RawPart::Text(text)]
        };
        Self { parts, vars: None }
    }

    /// A fragment whose `$name` references are bound through [`RawSql::var`].
    pub fn named(text: impl Into<String>) -> Self {
        Self {
            vars: Some(Vec::new()),
            ..Self::new(text)
        }
    }

    /// Append raw SQL (no parameters).
    pub fn push(&mut self, text: &str) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        match self.parts.last_mut() {
            Some(RawPart::Text(last)) => last.push_str(text),
            _ => self.parts.push(RawPart::Text(text.to_string())),
        }
        self
    }

    /// Append a parameter placeholder and bind its value.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.parts.push(RawPart::Value(value.into()));
        self
    }

    /// Append an expression (column, sub-query, nested raw fragment).
    pub fn push_expr(&mut self, expr: impl Into<Expr>) -> &mut Self {
        self.parts.push(RawPart::Expr(Box::new(expr.into())));
        self
    }

    /// Bind a named variable.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        let vars = self.vars.get_or_insert_with(Vec::new);
        match vars.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => vars.push((name, value)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Tracks named variable usage across the text parts of one fragment.
pub(crate) struct NamedVars<'a> {
    vars: &'a [(String, Value)],
    placeholders: Vec<Option<String>>,
}

impl<'a> NamedVars<'a> {
    pub(crate) fn new(vars: &'a [(String, Value)]) -> Self {
        Self {
            vars,
            placeholders: vec![None; vars.len()],
        }
    }

    /// Rewrite `$name` references in `text`, binding each variable once
    /// through `bind` (which returns the placeholder to emit).
    pub(crate) fn substitute(
        &mut self,
        text: &str,
        out: &mut String,
        bind: &mut dyn FnMut(&Value) -> String,
    ) -> QbResult<()> {
        let bytes = text.as_bytes();
        let mut i = 0;
        let mut copied = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'\'' => i = skip_quoted(bytes, i, b'\''),
                b'"' => i = skip_quoted(bytes, i, b'"'),
                b'$' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < bytes.len() && is_ident_byte(bytes[end]) {
                        end += 1;
                    }
                    let is_tag = end < bytes.len() && bytes[end] == b'$';
                    let starts_like_name = start < bytes.len()
                        && (bytes[start].is_ascii_alphabetic() || bytes[start] == b'_');

                    if is_tag && (end == start || starts_like_name) {
                        // `$$ ... $$` or `$tag$ ... $tag$`
                        let tag = &text[i..=end];
                        i = match text[end + 1..].find(tag) {
                            Some(pos) => end + 1 + pos + tag.len(),
                            None => bytes.len(),
                        };
                    } else if starts_like_name {
                        let name = &text[start..end];
                        out.push_str(&text[copied..i]);
                        let placeholder = self.placeholder(name, bind)?;
                        out.push_str(&placeholder);
                        i = end;
                        copied = end;
                    } else {
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        }
        out.push_str(&text[copied..]);
        Ok(())
    }

    fn placeholder(
        &mut self,
        name: &str,
        bind: &mut dyn FnMut(&Value) -> String,
    ) -> QbResult<String> {
        let Some(idx) = self.vars.iter().position(|(k, _)| k == name) else {
            return Err(QbError::validation(format!(
                "Query variable `{name}` is not provided"
            )));
        };
        if let Some(existing) = &self.placeholders[idx] {
            return Ok(existing.clone());
        }
        let placeholder = bind(&self.vars[idx].1);
        self.placeholders[idx] = Some(placeholder.clone());
        Ok(placeholder)
    }

    /// Fail on the first bound variable that was never referenced.
    pub(crate) fn finish(self) -> QbResult<()> {
        match self
            .vars
            .iter()
            .zip(&self.placeholders)
            .find(|(_, used)| used.is_none())
        {
            Some(((name, _), _)) => Err(QbError::validation(format!(
                "Query variable `{name}` is unused"
            ))),
            None => Ok(()),
        }
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Index just past the closing quote; a doubled quote is an escape.
fn skip_quoted(bytes: &[u8], open: usize, quote: u8) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}
