//! WHERE / HAVING builders, primary-key lookups and scopes.

use super::*;
use crate::expr::IntoExpr;
use crate::predicate::Op;
use crate::record::Record;
use crate::table::NON_DELETED_SCOPE;

impl Query {
    // ==================== WHERE ====================

    /// AND a predicate onto the filter.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self = self.absorb_predicate(&predicate);
        self.where_and.push(predicate);
        self
    }

    fn absorb_predicate(self, predicate: &Predicate) -> Self {
        match predicate {
            Predicate::Exists { query, .. } => self.absorb(query),
            Predicate::In {
                list: crate::predicate::InList::Query(query),
                ..
            } => self.absorb(query),
            _ => self,
        }
    }

    /// `column = value` (`IS NULL` for a null value).
    pub fn where_eq(self, column: impl IntoExpr, value: impl Into<Value>) -> Self {
        self.filter(Predicate::eq(column, value))
    }

    pub fn where_ne(self, column: impl IntoExpr, value: impl Into<Value>) -> Self {
        self.filter(Predicate::ne(column, value))
    }

    pub fn where_op(self, column: impl IntoExpr, op: Op, value: impl Into<Value>) -> Self {
        self.filter(Predicate::op(column, op, value))
    }

    pub fn where_in<V: Into<Value>>(
        self,
        column: impl IntoExpr,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Predicate::in_list(column, values))
    }

    pub fn where_not_in<V: Into<Value>>(
        self,
        column: impl IntoExpr,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Predicate::in_list(column, values).negate())
    }

    /// `column IN (<sub-query>)`
    pub fn where_in_query(self, column: impl IntoExpr, query: Query) -> Self {
        self.filter(Predicate::in_query(column, query))
    }

    pub fn where_null(self, column: impl IntoExpr) -> Self {
        self.filter(Predicate::is_null(column))
    }

    pub fn where_not_null(self, column: impl IntoExpr) -> Self {
        self.filter(Predicate::is_not_null(column))
    }

    pub fn where_between(
        self,
        column: impl IntoExpr,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.filter(Predicate::between(column, low, high))
    }

    pub fn where_raw(self, raw: RawSql) -> Self {
        self.filter(Predicate::Raw(raw))
    }

    pub fn where_exists(self, query: Query) -> Self {
        self.filter(Predicate::exists(query))
    }

    pub fn where_not_exists(self, query: Query) -> Self {
        self.filter(Predicate::exists(query).negate())
    }

    /// `NOT (...)`
    pub fn where_not(self, f: impl FnOnce(WhereBuilder) -> WhereBuilder) -> Self {
        match f(WhereBuilder::new()).into_predicate() {
            Some(p) => self.filter(Predicate::Not(Box::new(p))),
            None => self,
        }
    }

    /// A parenthesized group.
    pub fn where_group(self, f: impl FnOnce(WhereBuilder) -> WhereBuilder) -> Self {
        match f(WhereBuilder::new()).into_predicate() {
            Some(p) => self.filter(p),
            None => self,
        }
    }

    /// AND of `key = value` for every field of `record`.
    pub fn where_record(self, record: &Record) -> Self {
        record
            .iter()
            .fold(self, |q, (key, value)| q.where_eq(key, value.clone()))
    }

    /// Add one OR-group: `<existing> OR (<group>)`.
    pub fn or(mut self, f: impl FnOnce(WhereBuilder) -> WhereBuilder) -> Self {
        let group = f(WhereBuilder::new()).into_and_list();
        for p in &group {
            self = self.absorb_predicate(p);
        }
        if !group.is_empty() {
            self.where_or.push(group);
        }
        self
    }

    /// Add one OR-group from predicates.
    pub fn or_group(mut self, group: Vec<Predicate>) -> Self {
        for p in &group {
            self = self.absorb_predicate(p);
        }
        if !group.is_empty() {
            self.where_or.push(group);
        }
        self
    }

    // ==================== Lookups ====================

    /// Primary-key lookup returning exactly one row.
    ///
    /// A null key is recorded as a validation error; use [`Query::try_find`]
    /// to get it immediately.
    pub fn find(self, id: impl Into<Value>) -> Self {
        self.find_pk(id.into()).take()
    }

    /// Primary-key lookup returning at most one row.
    pub fn find_optional(self, id: impl Into<Value>) -> Self {
        self.find_pk(id.into()).take_optional()
    }

    pub fn try_find(self, id: impl Into<Value>) -> QbResult<Self> {
        let query = self.find(id);
        query.check()?;
        Ok(query)
    }

    fn find_pk(self, id: Value) -> Self {
        let keys: Vec<String> = self
            .shape
            .primary_keys()
            .into_iter()
            .map(str::to_string)
            .collect();
        let key = match keys.as_slice() {
            [key] => key.clone(),
            [] if self.shape.is_empty() => "id".to_string(),
            [] => {
                let table = self.alias().to_string();
                return self.fail(format!("Table `{table}` has no primary key"));
            }
            _ => {
                let table = self.alias().to_string();
                return self.fail(format!(
                    "Table `{table}` has a composite primary key, use find_by"
                ));
            }
        };
        if id.is_null() {
            let table = self.alias().to_string();
            return self.fail(format!(
                "find on `{table}` requires a non-null `{key}` value"
            ));
        }
        self.where_eq(key.as_str(), id)
    }

    /// Lookup by several columns returning exactly one row.
    pub fn find_by(self, record: &Record) -> Self {
        self.find_by_record(record).take()
    }

    pub fn find_by_optional(self, record: &Record) -> Self {
        self.find_by_record(record).take_optional()
    }

    fn find_by_record(self, record: &Record) -> Self {
        if record.is_empty() {
            return self.fail("find_by requires at least one column");
        }
        if let Some((key, _)) = record.iter().find(|(_, v)| v.is_null()) {
            return self.fail(format!("find_by requires a non-null `{key}` value"));
        }
        self.where_record(record)
    }

    /// Mark the query as statically empty: executing it sends nothing.
    pub fn none(mut self) -> Self {
        self.none = true;
        self
    }

    // ==================== HAVING ====================

    pub fn having(mut self, predicate: Predicate) -> Self {
        self.having_and.push(predicate);
        self
    }

    /// `expr <op> value`, e.g. `having_op(count(), Op::Gt, 1)`.
    pub fn having_op(self, expr: impl IntoExpr, op: Op, value: impl Into<Value>) -> Self {
        self.having(Predicate::op(expr, op, value))
    }

    pub fn having_raw(self, raw: RawSql) -> Self {
        self.having(Predicate::Raw(raw))
    }

    pub fn having_group(self, f: impl FnOnce(WhereBuilder) -> WhereBuilder) -> Self {
        match f(WhereBuilder::new()).into_predicate() {
            Some(p) => self.having(p),
            None => self,
        }
    }

    pub fn or_having(mut self, f: impl FnOnce(WhereBuilder) -> WhereBuilder) -> Self {
        let group = f(WhereBuilder::new()).into_and_list();
        if !group.is_empty() {
            self.having_or.push(group);
        }
        self
    }

    // ==================== Scopes ====================

    /// Apply a named scope declared on the table.
    pub fn scope(mut self, name: &str) -> Self {
        match self.scope_defs.get(name).cloned() {
            Some(predicates) => {
                self.scopes.insert(name.to_string(), predicates);
                self
            }
            None => {
                let table = self.alias().to_string();
                self.fail(format!("Scope `{name}` is not defined on `{table}`"))
            }
        }
    }

    /// Remove an applied scope (including default scopes).
    pub fn unscope(mut self, name: &str) -> Self {
        self.scopes.remove(name);
        self
    }

    /// Include soft-deleted rows.
    pub fn include_deleted(self) -> Self {
        self.unscope(NON_DELETED_SCOPE)
    }
}
