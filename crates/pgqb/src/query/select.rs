//! Selection, joins, CTEs, aggregation, set operations, ordering, locking and
//! return shaping.

use super::*;
use crate::expr::{IntoExpr, SelectItem, count};
use crate::predicate::JoinOn;

/// Something a query can join: a table name, a declared table, or a
/// `(target, shape)` pair.
pub trait JoinSource {
    fn into_join(self) -> (JoinTarget, Option<Arc<Shape>>);
}

impl JoinSource for &str {
    fn into_join(self) -> (JoinTarget, Option<Arc<Shape>>) {
        (self.into(), None)
    }
}

impl JoinSource for String {
    fn into_join(self) -> (JoinTarget, Option<Arc<Shape>>) {
        (self.into(), None)
    }
}

impl JoinSource for &Table {
    fn into_join(self) -> (JoinTarget, Option<Arc<Shape>>) {
        (self.into(), Some(self.shape.clone()))
    }
}

impl Query {
    // ==================== SELECT list ====================

    /// Append columns to the select list.
    pub fn select<I, E>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: IntoExpr,
    {
        self.select
            .extend(columns.into_iter().map(|c| SelectItem::new(c.into_expr())));
        self
    }

    /// Append `expr AS "alias"`.
    pub fn select_as(mut self, expr: impl IntoExpr, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self = self.check_ident(&alias);
        self.select.push(SelectItem::aliased(expr.into_expr(), alias));
        self
    }

    /// Append an arbitrary expression (sub-query, raw fragment, function call).
    pub fn select_expr(mut self, expr: impl IntoExpr) -> Self {
        let expr = expr.into_expr();
        if let Expr::SubQuery(q) = &expr {
            self = self.absorb(q);
        }
        self.select.push(SelectItem::new(expr));
        self
    }

    /// Append `"alias".*`.
    pub fn select_all(mut self) -> Self {
        let alias = self.alias().to_string();
        self.select.push(SelectItem::new(Expr::Star(Some(alias))));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct.get_or_insert_with(Vec::new);
        self
    }

    /// `DISTINCT ON (...)`
    pub fn distinct_on<I, E>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: IntoExpr,
    {
        self.distinct
            .get_or_insert_with(Vec::new)
            .extend(columns.into_iter().map(IntoExpr::into_expr));
        self
    }

    // ==================== FROM ====================

    /// Select from a sub-query instead of the table.
    pub fn from_query(mut self, query: Query) -> Self {
        self = self.absorb(&query);
        if self.as_.is_none() {
            self.as_ = Some(query.alias().to_string());
        }
        self.shape = if query.is_trivial() {
            query.shape.clone()
        } else {
            query.output_shape()
        };
        self.from = Some(FromSource::Query(Arc::new(query)));
        self
    }

    /// Select from a raw row source: `FROM (<raw>) "alias"`.
    pub fn from_raw(mut self, raw: RawSql, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self = self.check_ident(&alias);
        self.as_ = Some(alias);
        self.from = Some(FromSource::Raw(raw));
        self
    }

    /// `FROM ONLY` (skip inheriting tables).
    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    /// Alias the query's own source.
    pub fn as_(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self = self.check_ident(&alias);
        self.as_ = Some(alias);
        self
    }

    // ==================== JOIN ====================

    fn push_join(
        mut self,
        kind: JoinKind,
        target: JoinTarget,
        alias: Option<String>,
        shape: Option<Arc<Shape>>,
        on: Vec<Predicate>,
    ) -> Self {
        if let Some(alias) = &alias {
            self = self.check_ident(alias);
        }
        if let JoinTarget::Query(q) = &target {
            self = self.absorb(q);
        }
        let item = JoinItem {
            kind,
            target,
            alias,
            on,
        };
        if let (Some(shape), Some(name)) = (shape, item.reference()) {
            let name = name.to_string();
            self.joined_shapes.retain(|(n, _)| *n != name);
            self.joined_shapes.push((name, shape));
        }
        self.join.push(item);
        self
    }

    fn join_kind(
        self,
        kind: JoinKind,
        source: impl JoinSource,
        on: impl FnOnce(JoinOn) -> JoinOn,
    ) -> Self {
        let (target, shape) = source.into_join();
        let on = on(JoinOn::new()).into_and_list();
        self.push_join(kind, target, None, shape, on)
    }

    /// `JOIN "target" ON ...`
    ///
    /// ```ignore
    /// posts.query().join(&users, |on| on.on("users.id", "posts.user_id"))
    /// ```
    pub fn join(self, source: impl JoinSource, on: impl FnOnce(JoinOn) -> JoinOn) -> Self {
        self.join_kind(JoinKind::Inner, source, on)
    }

    pub fn left_join(self, source: impl JoinSource, on: impl FnOnce(JoinOn) -> JoinOn) -> Self {
        self.join_kind(JoinKind::Left, source, on)
    }

    pub fn right_join(self, source: impl JoinSource, on: impl FnOnce(JoinOn) -> JoinOn) -> Self {
        self.join_kind(JoinKind::Right, source, on)
    }

    pub fn full_join(self, source: impl JoinSource, on: impl FnOnce(JoinOn) -> JoinOn) -> Self {
        self.join_kind(JoinKind::Full, source, on)
    }

    pub fn cross_join(self, source: impl JoinSource) -> Self {
        let (target, shape) = source.into_join();
        self.push_join(JoinKind::Cross, target, None, shape, Vec::new())
    }

    /// Join an aliased sub-query.
    pub fn join_query(
        self,
        kind: JoinKind,
        query: Query,
        alias: impl Into<String>,
        on: impl FnOnce(JoinOn) -> JoinOn,
    ) -> Self {
        let shape = query.output_shape();
        let on = on(JoinOn::new()).into_and_list();
        self.push_join(
            kind,
            JoinTarget::Query(Arc::new(query)),
            Some(alias.into()),
            Some(shape),
            on,
        )
    }

    /// `JOIN LATERAL (...) "alias" ON ...` (`ON true` when no condition is given).
    pub fn join_lateral(
        self,
        query: Query,
        alias: impl Into<String>,
        on: impl FnOnce(JoinOn) -> JoinOn,
    ) -> Self {
        self.join_query(JoinKind::Lateral, query, alias, on)
    }

    pub fn left_join_lateral(
        self,
        query: Query,
        alias: impl Into<String>,
        on: impl FnOnce(JoinOn) -> JoinOn,
    ) -> Self {
        self.join_query(JoinKind::LeftLateral, query, alias, on)
    }

    /// Join a raw source, e.g. `sql("generate_series(1, 3) AS \"n\"")`.
    pub fn join_raw(self, kind: JoinKind, raw: RawSql, on: impl FnOnce(JoinOn) -> JoinOn) -> Self {
        let on = on(JoinOn::new()).into_and_list();
        self.push_join(kind, JoinTarget::Raw(raw), None, None, on)
    }

    // ==================== WITH ====================

    fn push_with(mut self, item: WithItem, shape: Arc<Shape>) -> Self {
        self = self.check_ident(&item.name);
        match &item.body {
            WithBody::Query(q) => self = self.absorb(q),
            WithBody::Recursive { base, step, .. } => self = self.absorb(base).absorb(step),
            WithBody::Raw(_) => {}
        }
        self.with_shapes.retain(|(n, _)| *n != item.name);
        self.with_shapes.push((item.name.clone(), shape));
        self.with.push(item);
        self
    }

    fn cte_shape(columns: &Option<Vec<String>>, fallback: Arc<Shape>) -> Arc<Shape> {
        match columns {
            Some(columns) => Arc::new(Shape::from_keys(columns.iter().cloned())),
            None => fallback,
        }
    }

    /// `WITH "name" AS (<query>)`
    pub fn with(self, name: impl Into<String>, query: Query) -> Self {
        let shape = query.output_shape();
        self.push_with(
            WithItem {
                name: name.into(),
                columns: None,
                recursive: false,
                materialized: None,
                body: WithBody::Query(Arc::new(query)),
            },
            shape,
        )
    }

    /// `WITH "name"("a", "b") AS (<query>)`
    pub fn with_columns<I, S>(self, name: impl Into<String>, columns: I, query: Query) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = Some(columns.into_iter().map(Into::into).collect());
        let shape = Self::cte_shape(&columns, query.output_shape());
        self.push_with(
            WithItem {
                name: name.into(),
                columns,
                recursive: false,
                materialized: None,
                body: WithBody::Query(Arc::new(query)),
            },
            shape,
        )
    }

    /// `WITH "name" AS [NOT] MATERIALIZED (<query>)`
    pub fn with_options(self, name: impl Into<String>, materialized: bool, query: Query) -> Self {
        let shape = query.output_shape();
        self.push_with(
            WithItem {
                name: name.into(),
                columns: None,
                recursive: false,
                materialized: Some(materialized),
                body: WithBody::Query(Arc::new(query)),
            },
            shape,
        )
    }

    /// `WITH RECURSIVE "name"(cols) AS (<base> UNION [ALL] <step>)`
    pub fn with_recursive<I, S>(
        self,
        name: impl Into<String>,
        columns: I,
        base: Query,
        step: Query,
        union_all: bool,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let columns = (!columns.is_empty()).then_some(columns);
        let shape = Self::cte_shape(&columns, base.output_shape());
        self.push_with(
            WithItem {
                name: name.into(),
                columns,
                recursive: true,
                materialized: None,
                body: WithBody::Recursive {
                    base: Arc::new(base),
                    step: Arc::new(step),
                    union_all,
                },
            },
            shape,
        )
    }

    /// `WITH "name"(cols) AS (<raw>)`
    pub fn with_raw<I, S>(self, name: impl Into<String>, columns: I, raw: RawSql) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let columns = (!columns.is_empty()).then_some(columns);
        let shape = Self::cte_shape(&columns, Arc::new(Shape::new()));
        self.push_with(
            WithItem {
                name: name.into(),
                columns,
                recursive: false,
                materialized: None,
                body: WithBody::Raw(raw),
            },
            shape,
        )
    }

    // ==================== GROUP BY / WINDOW ====================

    pub fn group<I, E>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: IntoExpr,
    {
        self.group
            .extend(columns.into_iter().map(IntoExpr::into_expr));
        self
    }

    /// Declare `WINDOW "name" AS (...)` for `expr.over("name")`.
    pub fn window(mut self, name: impl Into<String>, spec: WindowSpec) -> Self {
        let name = name.into();
        self = self.check_ident(&name);
        self.window.push((name, spec));
        self
    }

    // ==================== Set operations ====================

    fn set_op(mut self, kind: SetOpKind, query: Query) -> Self {
        self = self.absorb(&query);
        self.union.push(SetOp {
            kind,
            operand: SetOperand::Query(Arc::new(query)),
        });
        self
    }

    pub fn union(self, query: Query) -> Self {
        self.set_op(SetOpKind::Union, query)
    }

    pub fn union_all(self, query: Query) -> Self {
        self.set_op(SetOpKind::UnionAll, query)
    }

    pub fn intersect(self, query: Query) -> Self {
        self.set_op(SetOpKind::Intersect, query)
    }

    pub fn intersect_all(self, query: Query) -> Self {
        self.set_op(SetOpKind::IntersectAll, query)
    }

    pub fn except(self, query: Query) -> Self {
        self.set_op(SetOpKind::Except, query)
    }

    pub fn except_all(self, query: Query) -> Self {
        self.set_op(SetOpKind::ExceptAll, query)
    }

    /// Set operation with a raw operand.
    pub fn set_op_raw(mut self, kind: SetOpKind, raw: RawSql) -> Self {
        self.union.push(SetOp {
            kind,
            operand: SetOperand::Raw(raw),
        });
        self
    }

    // ==================== ORDER BY / LIMIT ====================

    pub fn order(mut self, column: impl IntoExpr) -> Self {
        self.order.push(OrderItem::asc(column.into_expr()));
        self
    }

    pub fn order_desc(mut self, column: impl IntoExpr) -> Self {
        self.order.push(OrderItem::desc(column.into_expr()));
        self
    }

    pub fn order_expr(mut self, item: OrderItem) -> Self {
        self.order.push(item);
        self
    }

    pub fn order_raw(mut self, raw: RawSql) -> Self {
        self.order.push(OrderItem::asc(Expr::Raw(raw)));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// 1-based page of `per_page` rows.
    pub fn paginate(self, page: u64, per_page: u64) -> Self {
        if page == 0 || per_page == 0 {
            return self.fail("paginate requires page >= 1 and per_page >= 1");
        }
        self.limit(per_page).offset((page - 1) * per_page)
    }

    // ==================== Locking ====================

    fn lock_with(mut self, strength: LockStrength) -> Self {
        let (of, wait) = match self.lock.take() {
            Some(lock) => (lock.of, lock.wait),
            None => (Vec::new(), None),
        };
        self.lock = Some(Lock { strength, of, wait });
        self
    }

    pub fn for_update(self) -> Self {
        self.lock_with(LockStrength::Update)
    }

    pub fn for_no_key_update(self) -> Self {
        self.lock_with(LockStrength::NoKeyUpdate)
    }

    pub fn for_share(self) -> Self {
        self.lock_with(LockStrength::Share)
    }

    pub fn for_key_share(self) -> Self {
        self.lock_with(LockStrength::KeyShare)
    }

    /// `FOR ... OF "a", "b"`
    pub fn lock_of<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.lock.as_mut() {
            Some(lock) => {
                lock.of.extend(tables.into_iter().map(Into::into));
                self
            }
            None => self.fail("lock_of requires a locking clause such as for_update()"),
        }
    }

    fn lock_wait(mut self, wait: LockWait) -> Self {
        match self.lock.as_mut() {
            Some(lock) => {
                lock.wait = Some(wait);
                self
            }
            None => self.fail("NOWAIT / SKIP LOCKED require a locking clause such as for_update()"),
        }
    }

    pub fn no_wait(self) -> Self {
        self.lock_wait(LockWait::NoWait)
    }

    pub fn skip_locked(self) -> Self {
        self.lock_wait(LockWait::SkipLocked)
    }

    // ==================== Return shaping ====================

    fn returns(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self.return_type_set = true;
        self
    }

    /// All rows as records.
    pub fn all(self) -> Self {
        self.returns(ReturnType::All)
    }

    /// Exactly one row; `NotFound` when there is none.
    pub fn take(self) -> Self {
        self.returns(ReturnType::OneOrThrow)
    }

    /// At most one row.
    pub fn take_optional(self) -> Self {
        self.returns(ReturnType::One)
    }

    /// A single value of `column`; `NotFound` when there is no row.
    pub fn get(mut self, column: impl IntoExpr) -> Self {
        self.select = vec![SelectItem::new(column.into_expr())];
        self.returns(ReturnType::ValueOrThrow)
    }

    pub fn get_optional(mut self, column: impl IntoExpr) -> Self {
        self.select = vec![SelectItem::new(column.into_expr())];
        self.returns(ReturnType::Value)
    }

    /// One value per row of `column`.
    pub fn pluck(mut self, column: impl IntoExpr) -> Self {
        self.select = vec![SelectItem::new(column.into_expr())];
        self.returns(ReturnType::Pluck)
    }

    /// Rows as positional value arrays.
    pub fn rows(self) -> Self {
        self.returns(ReturnType::Rows)
    }

    /// Discard results.
    pub fn exec(self) -> Self {
        self.returns(ReturnType::Void)
    }

    /// Only the affected/returned row count.
    pub fn row_count(self) -> Self {
        self.returns(ReturnType::RowCount)
    }

    /// Replace a `NULL` value result.
    pub fn coalesce(mut self, value: impl Into<Value>) -> Self {
        self.coalesce_value = Some(value.into());
        self
    }

    /// Replace a missing value result (no row).
    pub fn value_or(mut self, value: impl Into<Value>) -> Self {
        self.not_found_default = Some(value.into());
        self
    }

    /// `NotFound` instead of `None` for single-row results.
    pub fn throw_on_not_found(mut self) -> Self {
        self.throw_on_not_found = true;
        self
    }

    /// `SELECT count(*)`, wrapping in a sub-select when grouping, paging,
    /// `DISTINCT` or set operations would change the meaning.
    pub(crate) fn into_count(self) -> Query {
        let needs_wrap = !self.group.is_empty()
            || !self.having_and.is_empty()
            || !self.having_or.is_empty()
            || self.distinct.is_some()
            || !self.union.is_empty()
            || self.limit.is_some()
            || self.offset.is_some();

        let mut query = if needs_wrap {
            let mut inner = self.clone();
            inner.return_type = ReturnType::All;
            inner.hooks = Hooks::default();
            let mut outer = Query {
                log: self.log.clone(),
                none: self.none,
                hooks: self.hooks.clone(),
                auto_prepared_statements: self.auto_prepared_statements,
                ..Query::default()
            };
            if inner.select.is_empty() && inner.distinct.is_none() && inner.union.is_empty() {
                inner.select = vec![SelectItem::new(Expr::Raw(RawSql::new("1")))];
            }
            outer = outer.from_query(inner);
            outer
        } else {
            let mut q = self;
            q.order.clear();
            q
        };
        query.select = vec![SelectItem::new(count())];
        query.coalesce_value = None;
        query.not_found_default = None;
        query.return_type = ReturnType::Value;
        query
    }

    /// `SELECT true ... LIMIT 1`, discarding the select list.
    pub(crate) fn into_exists(mut self) -> Query {
        self.select = vec![SelectItem::new(Expr::Raw(RawSql::new("true")))];
        self.coalesce_value = None;
        self.not_found_default = None;
        self.return_type = ReturnType::Value;
        self.limit = Some(1);
        self
    }
}
