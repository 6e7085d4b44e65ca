//! `INSERT` / `UPDATE` / `DELETE` / `TRUNCATE` and column introspection.

use super::{Ctx, Scope};
use crate::column::ColumnDefault;
use crate::error::{QbError, QbResult};
use crate::expr::{Expr, SelectItem, col};
use crate::ident;
use crate::query::{
    ConflictAction, ConflictTarget, HookPhase, InsertSource, Query, QueryKind, ReturnType,
};
use crate::raw::RawSql;
use crate::record::Data;
use crate::value::Value;

fn field<'d>(data: &'d Data, key: &str) -> Option<&'d Expr> {
    data.fields.iter().find(|(k, _)| k == key).map(|(_, e)| e)
}

fn default_for<'q>(query: &'q Query, key: &str) -> Option<&'q ColumnDefault> {
    query
        .defaults
        .get(key)
        .or_else(|| query.shape.get(key).and_then(|c| c.default.as_ref()))
}

/// Insert column keys: payload keys in first-seen order, then keys with a
/// default that no payload row mentions.
fn insert_keys<'q>(query: &'q Query, rows: &'q [Data]) -> QbResult<Vec<&'q str>> {
    let mut keys: Vec<&str> = Vec::new();
    for key in rows.iter().flat_map(Data::keys) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    let shape_defaults = query
        .shape
        .iter()
        .filter(|(_, c)| c.default.is_some())
        .map(|(k, _)| k);
    for key in shape_defaults.chain(query.defaults.keys().map(String::as_str)) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    check_writable(query, keys.iter().copied())?;
    Ok(keys)
}

fn check_writable<'a>(query: &Query, keys: impl IntoIterator<Item = &'a str>) -> QbResult<()> {
    for key in keys {
        if query.shape.get(key).is_some_and(|c| c.read_only) {
            return Err(QbError::validation(format!(
                "Column `{key}` is read-only"
            )));
        }
    }
    Ok(())
}

impl Ctx<'_> {
    /// Bind a payload value for `key`, applying the column's encoder.
    fn bind_for(&mut self, query: &Query, key: &str, value: &Value, out: &mut String) {
        let value = match query.shape.get(key) {
            Some(column) => column.encode_value(value.clone()),
            None => value.clone(),
        };
        self.push_bind(out, value);
    }

    fn payload_expr(
        &mut self,
        query: &Query,
        scope: &Scope<'_>,
        key: &str,
        expr: &Expr,
        out: &mut String,
    ) -> QbResult<()> {
        match expr {
            Expr::Value(value) => {
                self.bind_for(query, key, value, out);
                Ok(())
            }
            other => self.expr(other, scope, out),
        }
    }

    /// Payload value, else default, else `DEFAULT`.
    fn insert_value(
        &mut self,
        query: &Query,
        scope: &Scope<'_>,
        row: &Data,
        key: &str,
        out: &mut String,
    ) -> QbResult<()> {
        if let Some(expr) = field(row, key) {
            return self.payload_expr(query, scope, key, expr, out);
        }
        match default_for(query, key) {
            Some(ColumnDefault::Value(value)) => self.bind_for(query, key, value, out),
            Some(ColumnDefault::Raw(raw)) => self.raw(raw, scope, out)?,
            Some(ColumnDefault::Fn(f)) => {
                let value = f();
                self.bind_for(query, key, &value, out);
            }
            None => out.push_str("DEFAULT"),
        }
        Ok(())
    }

    fn column_list(scope: &Scope<'_>, keys: &[&str], out: &mut String) {
        out.push_str(" (");
        out.push_str(&ident::quote_list(keys.iter().map(|k| scope.db_name(k))));
        out.push(')');
    }

    pub(crate) fn insert(&mut self, query: &Query, out: &mut String) -> QbResult<()> {
        self.with_clause(query, out)?;
        let table = self.require_table(query)?;
        let scope = Scope::of(query);

        out.push_str("INSERT INTO ");
        out.push_str(&self.table_name(query.schema.as_deref(), table));
        if let Some(alias) = query.as_.as_deref().filter(|a| *a != table) {
            out.push_str(" AS ");
            ident::push_quoted(out, alias);
        }

        let inserted: Vec<String> = match &query.insert {
            None => return Err(QbError::validation("Insert has no data")),
            Some(InsertSource::Rows(rows)) => {
                let keys = insert_keys(query, rows)?;
                if keys.is_empty() {
                    if rows.len() > 1 {
                        return Err(QbError::validation(
                            "Cannot insert several rows without columns",
                        ));
                    }
                    out.push_str(" DEFAULT VALUES");
                } else {
                    Self::column_list(&scope, &keys, out);
                    out.push_str(" VALUES ");
                    for (i, row) in rows.iter().enumerate() {
                        out.push_str(if i == 0 { "(" } else { ", (" });
                        for (j, key) in keys.iter().enumerate() {
                            if j > 0 {
                                out.push_str(", ");
                            }
                            self.insert_value(query, &scope, row, key, out)?;
                        }
                        out.push(')');
                    }
                }
                keys.into_iter().map(str::to_string).collect()
            }
            Some(InsertSource::Query { query: source, extra }) => {
                self.insert_select(query, &scope, source, extra, out)?
            }
            Some(InsertSource::Conditional { data, cte }) => {
                let rows = std::slice::from_ref(data);
                let keys = insert_keys(query, rows)?;
                if !keys.is_empty() {
                    Self::column_list(&scope, &keys, out);
                }
                out.push_str(" SELECT ");
                for (j, key) in keys.iter().enumerate() {
                    if j > 0 {
                        out.push_str(", ");
                    }
                    self.insert_value(query, &scope, data, key, out)?;
                }
                if !keys.is_empty() {
                    out.push(' ');
                }
                out.push_str("WHERE NOT EXISTS (SELECT 1 FROM ");
                ident::push_quoted(out, cte);
                out.push(')');
                keys.into_iter().map(str::to_string).collect()
            }
        };

        self.on_conflict(query, &scope, &inserted, out)?;
        self.returning(query, HookPhase::Create, &scope, out)
    }

    /// `INSERT INTO "t" (<source columns>, <extra keys>) SELECT ...`
    fn insert_select(
        &mut self,
        query: &Query,
        scope: &Scope<'_>,
        source: &Query,
        extra: &Data,
        out: &mut String,
    ) -> QbResult<Vec<String>> {
        let mut source = source.clone();
        if source.select.is_empty() {
            let keys: Vec<String> = source
                .shape
                .iter()
                .filter(|(_, c)| !c.hidden)
                .map(|(k, _)| k.to_string())
                .collect();
            if keys.is_empty() {
                return Err(QbError::validation(
                    "create_from requires a source query with known columns",
                ));
            }
            source.select = keys.iter().map(|k| SelectItem::new(col(k))).collect();
        }
        for (key, expr) in &extra.fields {
            let expr = match expr {
                Expr::Value(value) => Expr::Value(match query.shape.get(key) {
                    Some(column) => column.encode_value(value.clone()),
                    None => value.clone(),
                }),
                other => other.clone(),
            };
            source.select.push(SelectItem::aliased(expr, key.clone()));
        }

        let mut keys: Vec<String> = Vec::with_capacity(source.select.len());
        for item in &source.select {
            match item.output_name() {
                Some(name) => keys.push(name.to_string()),
                None => {
                    return Err(QbError::validation(
                        "create_from requires named columns in the source query",
                    ));
                }
            }
        }
        check_writable(query, keys.iter().map(String::as_str))?;

        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        Self::column_list(scope, &key_refs, out);
        out.push(' ');
        self.statement(&source, out)?;
        Ok(keys)
    }

    fn on_conflict(
        &mut self,
        query: &Query,
        scope: &Scope<'_>,
        inserted: &[String],
        out: &mut String,
    ) -> QbResult<()> {
        let Some(conflict) = &query.on_conflict else {
            return Ok(());
        };

        out.push_str(" ON CONFLICT");
        let target_columns: &[String] = match &conflict.target {
            ConflictTarget::Any => &[],
            ConflictTarget::Columns(columns) => {
                out.push_str(" (");
                out.push_str(&ident::quote_list(columns.iter().map(|c| scope.db_name(c))));
                out.push(')');
                columns
            }
            ConflictTarget::Constraint(name) => {
                out.push_str(" ON CONSTRAINT ");
                ident::push_quoted(out, name);
                &[]
            }
        };

        let sets: Vec<(String, Expr)> = match &conflict.action {
            ConflictAction::Nothing => Vec::new(),
            ConflictAction::Merge(columns) => {
                let columns: Vec<&String> = match columns {
                    Some(columns) => columns.iter().collect(),
                    None => inserted
                        .iter()
                        .filter(|k| !target_columns.contains(*k))
                        .collect(),
                };
                columns
                    .into_iter()
                    .map(|k| (k.clone(), Expr::Excluded(k.clone())))
                    .collect()
            }
            ConflictAction::Set(data) => data.fields.clone(),
        };

        if sets.is_empty() {
            out.push_str(" DO NOTHING");
            return Ok(());
        }
        if matches!(conflict.target, ConflictTarget::Any) {
            return Err(QbError::validation(
                "ON CONFLICT DO UPDATE requires conflict columns or a constraint",
            ));
        }
        check_writable(query, sets.iter().map(|(k, _)| k.as_str()))?;

        out.push_str(" DO UPDATE SET ");
        self.set_list(query, scope, &sets, out)
    }

    fn set_list(
        &mut self,
        query: &Query,
        scope: &Scope<'_>,
        sets: &[(String, Expr)],
        out: &mut String,
    ) -> QbResult<()> {
        for (i, (key, expr)) in sets.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            ident::push_quoted(out, scope.db_name(key));
            out.push_str(" = ");
            self.payload_expr(query, scope, key, expr, out)?;
        }
        Ok(())
    }

    /// `RETURNING` list. Row-count and void mutations skip it unless a hook
    /// of `phase` needs the affected rows.
    fn returning(
        &mut self,
        query: &Query,
        phase: HookPhase,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        let counting = matches!(query.return_type, ReturnType::RowCount | ReturnType::Void);
        let hooks_want_rows = query.hooks.wants_rows(phase);
        if counting && query.returning.is_empty() && !hooks_want_rows {
            return Ok(());
        }
        out.push_str(" RETURNING ");
        self.select_list(query, scope, true, out)
    }

    fn mutation_target(&self, query: &Query, verb: &str, out: &mut String) -> QbResult<()> {
        let table = self.require_table(query)?;
        out.push_str(verb);
        out.push_str(&self.table_name(query.schema.as_deref(), table));
        if let Some(alias) = query.as_.as_deref().filter(|a| *a != table) {
            out.push_str(" AS ");
            ident::push_quoted(out, alias);
        }
        Ok(())
    }

    fn require_filter(query: &Query, verb: &str) -> QbResult<()> {
        if query.has_filter() || query.all_rows || query.none {
            return Ok(());
        }
        Err(QbError::validation(format!(
            "Refusing to {verb} `{}` without a filter; call all_rows() to affect every row",
            query.alias()
        )))
    }

    pub(crate) fn update(&mut self, query: &Query, out: &mut String) -> QbResult<()> {
        self.update_for(query, HookPhase::Update, out)
    }

    /// An `UPDATE` whose `RETURNING` serves the hooks of `phase`; soft deletes
    /// compile through here with the delete phase.
    fn update_for(&mut self, query: &Query, phase: HookPhase, out: &mut String) -> QbResult<()> {
        Self::require_filter(query, "update")?;
        if query.update.is_empty() {
            return Err(QbError::validation(format!(
                "Update of `{}` has no columns to set",
                query.alias()
            )));
        }
        check_writable(query, query.update.iter().map(|(k, _)| k.as_str()))?;

        self.with_clause(query, out)?;
        let scope = Scope::of(query);
        self.mutation_target(query, "UPDATE ", out)?;
        out.push_str(" SET ");
        self.set_list(query, &scope, &query.update, out)?;
        self.using_list(query, " FROM ", &scope, out)?;

        let extra = Self::where_extra(query);
        self.conditions("WHERE", &query.where_and, &query.where_or, &extra, &scope, out)?;
        self.returning(query, phase, &scope, out)
    }

    pub(crate) fn delete(&mut self, query: &Query, out: &mut String) -> QbResult<()> {
        Self::require_filter(query, "delete from")?;

        if let (Some(column), false) = (&query.soft_delete, query.hard_delete) {
            let mut soft = query.clone();
            soft.kind = QueryKind::Update;
            soft.update = vec![(column.clone(), Expr::Raw(RawSql::new("now()")))];
            return self.update_for(&soft, HookPhase::Delete, out);
        }

        self.with_clause(query, out)?;
        let scope = Scope::of(query);
        self.mutation_target(query, "DELETE FROM ", out)?;
        self.using_list(query, " USING ", &scope, out)?;

        let extra = Self::where_extra(query);
        self.conditions("WHERE", &query.where_and, &query.where_or, &extra, &scope, out)?;
        self.returning(query, HookPhase::Delete, &scope, out)
    }

    fn using_list(
        &mut self,
        query: &Query,
        keyword: &str,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> QbResult<()> {
        for (i, target) in query.using.iter().enumerate() {
            out.push_str(if i == 0 { keyword } else { ", " });
            self.join_target(target, None, scope, out)?;
        }
        Ok(())
    }

    pub(crate) fn truncate(&mut self, query: &Query, out: &mut String) -> QbResult<()> {
        let table = self.require_table(query)?;
        out.push_str("TRUNCATE ");
        out.push_str(&self.table_name(query.schema.as_deref(), table));
        if query.restart_identity {
            out.push_str(" RESTART IDENTITY");
        }
        if query.cascade {
            out.push_str(" CASCADE");
        }
        Ok(())
    }

    pub(crate) fn column_info(&mut self, query: &Query, out: &mut String) -> QbResult<()> {
        let table = self.require_table(query)?;
        out.push_str(
            "SELECT \"column_name\" AS \"name\", \"data_type\" AS \"type\", \
             \"column_default\" AS \"default\", (\"is_nullable\" = 'YES') AS \"nullable\", \
             \"character_maximum_length\" AS \"maxLength\" \
             FROM \"information_schema\".\"columns\" WHERE \"table_schema\" = ",
        );
        match query.schema.as_deref() {
            Some(schema) => self.push_bind(out, Value::from(schema)),
            None => out.push_str("current_schema()"),
        }
        out.push_str(" AND \"table_name\" = ");
        self.push_bind(out, Value::from(table));
        if let Some(column) = &query.column {
            out.push_str(" AND \"column_name\" = ");
            let db = query.shape.db_name(column).to_string();
            self.push_bind(out, Value::from(db));
        }
        out.push_str(" ORDER BY \"ordinal_position\"");
        Ok(())
    }
}
