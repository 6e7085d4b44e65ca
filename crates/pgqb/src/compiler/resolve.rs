//! Column resolution against the selectable set of a query.

use crate::column::Shape;
use crate::error::{QbError, QbResult};
use crate::expr::ColumnRef;
use crate::ident;
use crate::query::{JoinTarget, Query};

/// A resolved column reference.
pub(crate) struct Resolved {
    pub(crate) sql: String,
    /// The logical key differs from the db-side name.
    pub(crate) renamed: bool,
}

/// Sources visible to unqualified column names of one query level.
pub(crate) struct Scope<'q> {
    pub(crate) alias: &'q str,
    pub(crate) own: &'q Shape,
    joined: Vec<(&'q str, &'q Shape)>,
    select_aliases: Vec<&'q str>,
}

fn lookup<'q>(shapes: &'q [(String, std::sync::Arc<Shape>)], name: &str) -> Option<&'q Shape> {
    shapes
        .iter()
        .rev()
        .find(|(n, _)| n == name)
        .map(|(_, s)| &**s)
}

impl<'q> Scope<'q> {
    pub(crate) fn of(query: &'q Query) -> Self {
        let alias = query.alias();
        let mut own: &Shape = &query.shape;
        if own.is_empty() && query.from.is_none() {
            if let Some(cte) = query.table.as_deref().and_then(|t| lookup(&query.with_shapes, t)) {
                own = cte;
            }
        }

        let joined = query
            .join
            .iter()
            .filter_map(|item| {
                let name = item.reference()?;
                let shape = lookup(&query.joined_shapes, name).or_else(|| match &item.target {
                    JoinTarget::Table { name: table, .. } => lookup(&query.with_shapes, table),
                    _ => None,
                })?;
                Some((name, shape))
            })
            .collect();

        let select_aliases = query
            .select
            .iter()
            .filter_map(|item| item.alias.as_deref())
            .collect();

        Self {
            alias,
            own,
            joined,
            select_aliases,
        }
    }

    fn qualified(table: &str, shape: &Shape, key: &str) -> Resolved {
        let db = shape.db_name(key);
        Resolved {
            sql: ident::quote_column(Some(table), db),
            renamed: db != key,
        }
    }

    pub(crate) fn resolve(&self, column: &ColumnRef) -> QbResult<Resolved> {
        let name = column.name.as_str();

        if let Some(table) = column.table.as_deref() {
            if table == self.alias {
                return Ok(Self::qualified(table, self.own, name));
            }
            if let Some((_, shape)) = self.joined.iter().rev().find(|(n, _)| *n == table) {
                return Ok(Self::qualified(table, shape, name));
            }
            return Ok(Resolved {
                sql: ident::quote_column(Some(table), name),
                renamed: false,
            });
        }

        if self.own.contains(name) {
            return Ok(Self::qualified(self.alias, self.own, name));
        }

        let is_select_alias = self.select_aliases.contains(&name);

        // An undeclared own table takes every unqualified name that is not
        // a select alias; joined sources need a qualifier.
        if self.own.is_empty() && !is_select_alias {
            return Ok(Resolved {
                sql: ident::quote_column(Some(self.alias), name),
                renamed: false,
            });
        }

        let mut matches = self
            .joined
            .iter()
            .rev()
            .filter(|(_, shape)| shape.contains(name));
        if let Some((table, shape)) = matches.next() {
            if matches.next().is_some() {
                return Err(QbError::validation(format!("Column `{name}` is ambiguous")));
            }
            return Ok(Self::qualified(table, shape, name));
        }

        if is_select_alias {
            return Ok(Resolved {
                sql: ident::quote(name),
                renamed: false,
            });
        }

        Err(QbError::validation(format!("Column `{name}` not found")))
    }

    /// Db-side name of an own column, for `SET` / `INSERT` column lists.
    pub(crate) fn db_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.own.db_name(key)
    }
}
