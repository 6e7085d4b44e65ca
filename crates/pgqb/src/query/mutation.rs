//! INSERT / UPDATE / DELETE / TRUNCATE builders.

use super::*;
use crate::expr::{IntoExpr, col};
use crate::record::Record;
use std::fmt;

/// Create payload for `or_create` / `upsert`: ready data, or a closure run at
/// most once and only when a row actually has to be inserted.
pub enum CreateData {
    Data(Data),
    Lazy(Box<dyn FnOnce() -> QbResult<Data> + Send>),
}

impl CreateData {
    pub fn lazy(f: impl FnOnce() -> QbResult<Data> + Send + 'static) -> Self {
        CreateData::Lazy(Box::new(f))
    }

    pub(crate) fn resolve(self) -> QbResult<Data> {
        match self {
            CreateData::Data(data) => Ok(data),
            CreateData::Lazy(f) => f(),
        }
    }
}

impl fmt::Debug for CreateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateData::Data(data) => f.debug_tuple("Data").field(data).finish(),
            CreateData::Lazy(_) => f.write_str("Lazy(<fn>)"),
        }
    }
}

impl From<Data> for CreateData {
    fn from(data: Data) -> Self {
        CreateData::Data(data)
    }
}

impl From<Record> for CreateData {
    fn from(record: Record) -> Self {
        CreateData::Data(record.into())
    }
}

impl Query {
    fn into_kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    pub(super) fn absorb_data(mut self, data: &Data) -> Self {
        for (key, expr) in &data.fields {
            self = self.check_ident(key);
            if let Expr::SubQuery(q) = expr {
                self = self.absorb(q);
            }
        }
        self
    }

    /// Mutations default to a row count unless a row-returning shape was chosen.
    fn default_count(mut self) -> Self {
        if self.return_type == ReturnType::All {
            self.return_type = ReturnType::RowCount;
        }
        self
    }

    // ==================== INSERT ====================

    /// Insert one row and return it.
    pub fn create(self, data: impl Into<Data>) -> Self {
        self.insert_rows(vec![data.into()]).take()
    }

    /// Insert several rows and return them.
    pub fn create_many<D: Into<Data>>(self, rows: impl IntoIterator<Item = D>) -> Self {
        self.insert_rows(rows.into_iter().map(Into::into).collect())
            .all()
    }

    /// Insert one row, returning the row count.
    pub fn insert(self, data: impl Into<Data>) -> Self {
        self.insert_rows(vec![data.into()]).row_count()
    }

    pub fn insert_many<D: Into<Data>>(self, rows: impl IntoIterator<Item = D>) -> Self {
        self.insert_rows(rows.into_iter().map(Into::into).collect())
            .row_count()
    }

    fn insert_rows(mut self, rows: Vec<Data>) -> Self {
        if rows.is_empty() {
            return self.fail("Cannot insert an empty list of rows");
        }
        for data in &rows {
            self = self.absorb_data(data);
        }
        self.insert = Some(match self.insert.take() {
            Some(InsertSource::Rows(mut existing)) => {
                existing.extend(rows);
                InsertSource::Rows(existing)
            }
            _ => InsertSource::Rows(rows),
        });
        self.into_kind(QueryKind::Insert)
    }

    /// `INSERT INTO "t"(<query columns>, <extra keys>) SELECT ...` from a
    /// query returning at most one row.
    pub fn create_from(mut self, query: Query, extra: impl Into<Data>) -> Self {
        if !query.return_type.is_single() {
            return self.fail(
                "create_from requires a query returning at most one row (find, take, get)",
            );
        }
        let extra = extra.into();
        self = self.absorb(&query).absorb_data(&extra);
        self.insert = Some(InsertSource::Query {
            query: Arc::new(query),
            extra,
        });
        self.into_kind(QueryKind::Insert).take()
    }

    /// `ON CONFLICT ("a", "b")`; an empty list means any conflict.
    /// Follow with [`ignore`](Query::ignore), [`merge_conflict`](Query::merge_conflict),
    /// [`merge_columns`](Query::merge_columns) or [`set_conflict`](Query::set_conflict).
    pub fn on_conflict<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let target = if columns.is_empty() {
            ConflictTarget::Any
        } else {
            ConflictTarget::Columns(columns)
        };
        self.on_conflict = Some(OnConflict {
            target,
            action: ConflictAction::Nothing,
        });
        self
    }

    /// `ON CONFLICT ON CONSTRAINT "name"`
    pub fn on_conflict_constraint(mut self, name: impl Into<String>) -> Self {
        self.on_conflict = Some(OnConflict {
            target: ConflictTarget::Constraint(name.into()),
            action: ConflictAction::Nothing,
        });
        self
    }

    fn conflict_action(mut self, action: ConflictAction) -> Self {
        match self.on_conflict.as_mut() {
            Some(conflict) => {
                conflict.action = action;
                self
            }
            None => self.fail("Conflict action requires on_conflict() first"),
        }
    }

    /// `DO NOTHING`
    pub fn ignore(self) -> Self {
        self.conflict_action(ConflictAction::Nothing)
    }

    /// `DO UPDATE SET` every inserted column from `excluded`.
    pub fn merge_conflict(self) -> Self {
        self.conflict_action(ConflictAction::Merge(None))
    }

    /// `DO UPDATE SET` the given columns from `excluded`.
    pub fn merge_columns<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        self.conflict_action(ConflictAction::Merge(Some(columns)))
    }

    /// `DO UPDATE SET` explicit values.
    pub fn set_conflict(self, data: impl Into<Data>) -> Self {
        let data = data.into();
        self.absorb_data(&data)
            .conflict_action(ConflictAction::Set(data))
    }

    // ==================== UPDATE ====================

    /// `UPDATE ... SET`; requires a filter unless [`all_rows`](Query::all_rows) is set.
    pub fn update(mut self, data: impl Into<Data>) -> Self {
        let data = data.into();
        self = self.absorb_data(&data);
        self.update.extend(data.fields);
        self.into_kind(QueryKind::Update).default_count()
    }

    /// `SET "column" = "t"."column" + $n`
    pub fn increment(self, column: &str, by: impl Into<Value>) -> Self {
        let expr = col(column).add(Expr::Value(by.into()));
        self.update(Data::new().set_expr(column, expr))
    }

    /// `SET "column" = "t"."column" - $n`
    pub fn decrement(self, column: &str, by: impl Into<Value>) -> Self {
        let expr = col(column).sub(Expr::Value(by.into()));
        self.update(Data::new().set_expr(column, expr))
    }

    /// `UPDATE ... FROM` / `DELETE ... USING` sources.
    pub fn using(mut self, target: impl Into<JoinTarget>) -> Self {
        self.using.push(target.into());
        self
    }

    // ==================== DELETE ====================

    /// Delete matching rows; on soft-delete tables this sets the
    /// soft-delete column to `now()` instead.
    pub fn delete(self) -> Self {
        self.into_kind(QueryKind::Delete).default_count()
    }

    /// Delete matching rows even on soft-delete tables.
    pub fn hard_delete(mut self) -> Self {
        self.hard_delete = true;
        self.delete()
    }

    /// Allow `update` / `delete` without a filter.
    pub fn all_rows(mut self) -> Self {
        self.all_rows = true;
        self
    }

    // ==================== TRUNCATE ====================

    pub fn truncate(self) -> Self {
        self.into_kind(QueryKind::Truncate).exec()
    }

    pub fn restart_identity(mut self) -> Self {
        self.restart_identity = true;
        self
    }

    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    // ==================== Introspection ====================

    /// Column metadata from `information_schema.columns`, for every column
    /// or (with `Some`) a single one.
    pub fn column_info(mut self, column: Option<&str>) -> Self {
        self.column = column.map(str::to_string);
        let single = column.is_some();
        let query = self.into_kind(QueryKind::ColumnInfo);
        if single { query.take_optional() } else { query.all() }
    }

    // ==================== RETURNING ====================

    /// Explicit `RETURNING` list; switches row-count mutations to returning rows.
    pub fn returning<I, E>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: IntoExpr,
    {
        self.returning
            .extend(columns.into_iter().map(|c| SelectItem::new(c.into_expr())));
        if matches!(self.return_type, ReturnType::RowCount | ReturnType::Void) {
            self.return_type = ReturnType::All;
            self.return_type_set = true;
        }
        self
    }
}
