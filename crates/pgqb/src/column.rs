//! Column metadata consumed by the builder and compiler.
//!
//! The column type system proper lives outside this crate; the core only needs
//! the SQL type name, nullability, key/default information, an optional
//! db-side name and optional encode/parse functions.

use crate::raw::RawSql;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Converts a value before it is bound as a parameter (or after it is read).
pub type ValueFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Default applied to a column when a create payload omits it.
#[derive(Clone)]
pub enum ColumnDefault {
    /// A static value bound as a parameter.
    Value(Value),
    /// A SQL expression emitted verbatim (e.g. `now()`).
    Raw(RawSql),
    /// Computed per created row.
    Fn(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl fmt::Debug for ColumnDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Raw(r) => f.debug_tuple("Raw").field(r).finish(),
            Self::Fn(_) => f.write_str("Fn(<fn>)"),
        }
    }
}

/// A declared column.
#[derive(Clone, Default)]
pub struct Column {
    pub sql_type: String,
    /// Db-side name when it differs from the logical key.
    pub name: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
    pub read_only: bool,
    /// Excluded from the default `SELECT` list.
    pub hidden: bool,
    pub default: Option<ColumnDefault>,
    pub encode: Option<ValueFn>,
    pub parse: Option<ValueFn>,
    /// Free-form metadata attached by other modules.
    pub data: BTreeMap<String, serde_json::Value>,
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("sql_type", &self.sql_type)
            .field("name", &self.name)
            .field("nullable", &self.nullable)
            .field("primary_key", &self.primary_key)
            .field("read_only", &self.read_only)
            .field("default", &self.default)
            .field("encode", &self.encode.as_ref().map(|_| "<fn>"))
            .field("parse", &self.parse.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Column {
    pub fn new(sql_type: impl Into<String>) -> Self {
        Self {
            sql_type: sql_type.into(),
            ..Self::default()
        }
    }

    pub fn integer() -> Self {
        Self::new("integer")
    }

    pub fn bigint() -> Self {
        Self::new("bigint")
    }

    pub fn text() -> Self {
        Self::new("text")
    }

    pub fn boolean() -> Self {
        Self::new("boolean")
    }

    pub fn timestamptz() -> Self {
        Self::new("timestamptz")
    }

    pub fn jsonb() -> Self {
        Self::new("jsonb")
    }

    pub fn uuid() -> Self {
        Self::new("uuid")
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Set the db-side column name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(ColumnDefault::Value(value.into()));
        self
    }

    pub fn default_raw(mut self, raw: RawSql) -> Self {
        self.default = Some(ColumnDefault::Raw(raw));
        self
    }

    pub fn default_fn(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(ColumnDefault::Fn(Arc::new(f)));
        self
    }

    pub fn encode(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.encode = Some(Arc::new(f));
        self
    }

    pub fn parse(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.parse = Some(Arc::new(f));
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub(crate) fn encode_value(&self, value: Value) -> Value {
        match (&self.encode, value) {
            (_, Value::Null) => Value::Null,
            (Some(encode), value) => encode(value),
            (None, value) => value,
        }
    }
}

/// Declared columns of a table or sub-query, keyed by logical name and kept
/// in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Shape {
    columns: Vec<(String, Column)>,
}

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, key: impl Into<String>, column: Column) -> Self {
        self.insert(key, column);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, column: Column) {
        let key = key.into();
        match self.columns.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = column,
            None => self.columns.push((key, column)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|(k, _)| k == key).map(|(_, c)| c)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(k, _)| k.as_str())
    }

    /// Db-side name of `key`, falling back to the key itself.
    pub fn db_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.get(key)
            .and_then(|c| c.name.as_deref())
            .unwrap_or(key)
    }

    /// Reverse lookup from a db-side column name to its logical key.
    pub fn key_for_db_name(&self, db_name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(k, c)| c.name.as_deref().unwrap_or(k) == db_name)
            .map(|(k, _)| k.as_str())
    }

    pub fn primary_keys(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, c)| c.primary_key)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// True when a plain `"t".*` reproduces the declared shape.
    pub(crate) fn selects_as_star(&self) -> bool {
        self.columns
            .iter()
            .all(|(k, c)| !c.hidden && c.name.as_deref().is_none_or(|n| n == k))
    }

    /// Shallow merge: columns of `other` override same-named columns here.
    pub(crate) fn merged(&self, other: &Shape) -> Shape {
        let mut out = self.clone();
        for (k, c) in &other.columns {
            out.insert(k.clone(), c.clone());
        }
        out
    }

    /// A shape with the given keys and untyped columns (used for sub-query outputs).
    pub(crate) fn from_keys<I, S>(keys: I) -> Shape
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut shape = Shape::new();
        for key in keys {
            shape.insert(key, Column::default());
        }
        shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Shape {
        Shape::new()
            .column("id", Column::integer().primary_key())
            .column("firstName", Column::text().name("first_name"))
            .column("secret", Column::text().hidden())
    }

    #[test]
    fn db_name_mapping() {
        let shape = users();
        assert_eq!(shape.db_name("firstName"), "first_name");
        assert_eq!(shape.db_name("id"), "id");
        assert_eq!(shape.key_for_db_name("first_name"), Some("firstName"));
        assert_eq!(shape.primary_keys(), vec!["id"]);
        assert!(!shape.selects_as_star());
        assert!(Shape::from_keys(["a", "b"]).selects_as_star());
    }

    #[test]
    fn encode_skips_null() {
        let col = Column::text().encode(|v| Value::Text(format!("enc:{v}")));
        assert_eq!(col.encode_value(Value::Null), Value::Null);
        assert_eq!(col.encode_value(Value::from("a")), Value::Text("enc:'a'".into()));
    }

    #[test]
    fn merged_prefers_right() {
        let left = Shape::new().column("a", Column::integer());
        let right = Shape::new()
            .column("a", Column::text())
            .column("b", Column::integer());
        let merged = left.merged(&right);
        assert_eq!(merged.get("a").map(|c| c.sql_type.as_str()), Some("text"));
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
