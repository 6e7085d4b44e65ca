//! Result rows and mutation payloads.

use crate::error::{QbError, QbResult};
use crate::expr::Expr;
use crate::value::Value;
use serde::de::DeserializeOwned;
use tokio_postgres::Row;

/// A result row: an ordered list of `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any existing value under the same key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Map this record onto any deserializable type (e.g. a `#[derive(Deserialize)]` struct).
    pub fn deserialize<T: DeserializeOwned>(&self) -> QbResult<T> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| QbError::Serialization(e.to_string()))
    }

    /// Decode a tokio-postgres row.
    pub fn from_row(row: &Row) -> QbResult<Self> {
        let mut fields = Vec::with_capacity(row.len());
        for (idx, column) in row.columns().iter().enumerate() {
            let value: Value = row
                .try_get(idx)
                .map_err(|e| QbError::decode(column.name(), e.to_string()))?;
            fields.push((column.name().to_string(), value));
        }
        Ok(Self { fields })
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// Mutation payload for create/update: ordered `(key, expression)` pairs.
///
/// Plain values become bound parameters; expressions (raw SQL, sub-queries,
/// column arithmetic) are compiled in place.
#[derive(Debug, Clone, Default)]
pub struct Data {
    pub(crate) fields: Vec<(String, Expr)>,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_expr(key, Expr::Value(value.into()))
    }

    pub fn set_expr(mut self, key: impl Into<String>, expr: impl Into<Expr>) -> Self {
        let key = key.into();
        let expr = expr.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = expr,
            None => self.fields.push((key, expr)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }
}

impl From<Record> for Data {
    fn from(record: Record) -> Self {
        Self {
            fields: record
                .into_iter()
                .map(|(k, v)| (k, Expr::Value(v)))
                .collect(),
        }
    }
}

/// Build a [`Record`] from `key => value` pairs.
///
/// ```ignore
/// let user = pgqb::record! { "name" => "alice", "age" => 30 };
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::Record::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $( record.insert($key, $value); )+
        record
    }};
}
