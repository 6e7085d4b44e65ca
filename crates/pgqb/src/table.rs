//! Table definitions.
//!
//! A [`Table`] is the static description queries start from: name, schema,
//! declared columns, named scopes, soft-delete column and lifecycle hooks.

use crate::column::Shape;
use crate::predicate::{Predicate, WhereBuilder};
use crate::query::{Hooks, Query};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the scope a soft-delete table applies by default.
pub const NON_DELETED_SCOPE: &str = "nonDeleted";

/// Default soft-delete column.
pub const DEFAULT_SOFT_DELETE_COLUMN: &str = "deleted_at";

#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) name: String,
    pub(crate) schema: Option<String>,
    pub(crate) shape: Arc<Shape>,
    pub(crate) soft_delete: Option<String>,
    pub(crate) scopes: BTreeMap<String, Vec<Predicate>>,
    pub(crate) default_scopes: Vec<String>,
    pub(crate) hooks: Hooks,
}

impl Table {
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            schema: None,
            shape: Arc::new(shape),
            soft_delete: None,
            scopes: BTreeMap::new(),
            default_scopes: Vec::new(),
            hooks: Hooks::default(),
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Mark rows as deleted through `column` instead of removing them.
    ///
    /// Queries then filter `"column" IS NULL` unless `include_deleted()` is
    /// called, and `delete()` becomes `UPDATE ... SET "column" = now()`.
    pub fn soft_delete(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.scopes.insert(
            NON_DELETED_SCOPE.to_string(),
            vec![Predicate::is_null(column.as_str())],
        );
        if !self.default_scopes.iter().any(|s| s == NON_DELETED_SCOPE) {
            self.default_scopes.push(NON_DELETED_SCOPE.to_string());
        }
        self.soft_delete = Some(column);
        self
    }

    /// Declare a named scope, applied with `Query::scope(name)`.
    pub fn scope(
        mut self,
        name: impl Into<String>,
        f: impl FnOnce(WhereBuilder) -> WhereBuilder,
    ) -> Self {
        self.scopes
            .insert(name.into(), f(WhereBuilder::new()).into_and_list());
        self
    }

    /// Declare a scope applied to every query; remove it with `Query::unscope`.
    pub fn default_scope(
        self,
        name: impl Into<String>,
        f: impl FnOnce(WhereBuilder) -> WhereBuilder,
    ) -> Self {
        let name = name.into();
        let mut table = self.scope(name.clone(), f);
        table.default_scopes.push(name);
        table
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn primary_keys(&self) -> Vec<&str> {
        self.shape.primary_keys()
    }

    /// A fresh select query over this table.
    pub fn query(&self) -> Query {
        Query::from_table(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;

    #[test]
    fn soft_delete_registers_default_scope() {
        let table = Table::new(
            "post",
            Shape::new().column("id", Column::integer().primary_key()),
        )
        .soft_delete(DEFAULT_SOFT_DELETE_COLUMN)
        .soft_delete(DEFAULT_SOFT_DELETE_COLUMN);

        assert_eq!(table.default_scopes, vec![NON_DELETED_SCOPE.to_string()]);
        assert_eq!(table.soft_delete.as_deref(), Some("deleted_at"));
        assert_eq!(table.primary_keys(), vec!["id"]);
    }
}
