//! Find-or-create and upsert.
//!
//! Both run inside a transaction (the current one, or a new one). The insert
//! is guarded by the read query itself:
//!
//! ```sql
//! WITH "q" AS (SELECT ... LIMIT 1)
//! INSERT INTO "t"("a") SELECT $1 WHERE NOT EXISTS (SELECT 1 FROM "q")
//! RETURNING *
//! ```
//!
//! so a concurrent insert between the read and the write yields no row, and
//! the row is read again instead of being inserted twice.

use super::*;
use crate::db::Db;
use crate::record::Record;
use std::future::Future;
use std::panic::Location;

const GUARD_CTE: &str = "q";

impl Query {
    /// The row matched by this single-row query, inserting `data` when none
    /// exists.
    ///
    /// ```ignore
    /// let user = users
    ///     .query()
    ///     .find_by(&record! { "email" => "a@b.c" })
    ///     .or_create(&db, record! { "email" => "a@b.c", "name" => "A" })
    ///     .await?;
    /// ```
    #[track_caller]
    pub fn or_create(
        self,
        db: &Db,
        data: impl Into<CreateData>,
    ) -> impl Future<Output = QbResult<Record>> + Send + '_ {
        let location = Location::caller();
        let data = data.into();
        async move { self.find_or_create(db, data).await.map_err(|e| e.at(location)) }
    }

    /// Like [`or_create`](Query::or_create), building the payload only when a
    /// row has to be inserted.
    #[track_caller]
    pub fn or_create_with(
        self,
        db: &Db,
        f: impl FnOnce() -> QbResult<Data> + Send + 'static,
    ) -> impl Future<Output = QbResult<Record>> + Send + '_ {
        let location = Location::caller();
        let data = CreateData::lazy(f);
        async move { self.find_or_create(db, data).await.map_err(|e| e.at(location)) }
    }

    /// Update the row matched by this single-row query with `update`, or
    /// insert `create` when there is none.
    #[track_caller]
    pub fn upsert(
        self,
        db: &Db,
        update: impl Into<Data>,
        create: impl Into<CreateData>,
    ) -> impl Future<Output = QbResult<Record>> + Send + '_ {
        let location = Location::caller();
        let update = update.into();
        let create = create.into();
        async move {
            self.update_or_create(db, update, create)
                .await
                .map_err(|e| e.at(location))
        }
    }

    fn require_single(&self, operation: &str) -> QbResult<()> {
        self.check()?;
        if self.return_type.is_single() {
            Ok(())
        } else {
            Err(QbError::validation(format!(
                "{operation} requires a query returning at most one row (find, find_by, take)"
            )))
        }
    }

    async fn find_or_create(self, db: &Db, data: CreateData) -> QbResult<Record> {
        self.require_single("or_create")?;
        db.ensure_transaction(move || async move { self.create_if_missing(db, data).await })
            .await
    }

    async fn update_or_create(self, db: &Db, update: Data, create: CreateData) -> QbResult<Record> {
        self.require_single("upsert")?;
        db.ensure_transaction(move || async move {
            let mut updated = self
                .clone()
                .update(update)
                .all()
                .perform(db)
                .await?
                .into_records()
                .into_iter();
            match (updated.next(), updated.len()) {
                (None, _) => self.create_if_missing(db, create).await,
                (Some(row), 0) => Ok(row),
                (Some(_), more) => Err(QbError::validation(format!(
                    "upsert updated {} rows of `{}`; the query must match at most one row",
                    more + 1,
                    self.alias()
                ))),
            }
        })
        .await
    }

    /// Same filters, no hooks, never throwing.
    fn guard_read(&self) -> Query {
        let mut read = self.clone();
        read.hooks = Hooks::default();
        read.return_type = ReturnType::One;
        read.throw_on_not_found = false;
        read.kind = QueryKind::Select;
        read
    }

    fn guarded_insert(&self, data: Data) -> Query {
        let insert = Query {
            table: self.table.clone(),
            schema: self.schema.clone(),
            shape: self.shape.clone(),
            defaults: self.defaults.clone(),
            parsers: self.parsers.clone(),
            hooks: self.hooks.clone(),
            log: self.log.clone(),
            auto_prepared_statements: self.auto_prepared_statements,
            ..Query::default()
        };
        let mut insert = insert.with(GUARD_CTE, self.guard_read()).absorb_data(&data);
        insert.insert = Some(InsertSource::Conditional {
            data,
            cte: GUARD_CTE.to_string(),
        });
        insert.kind = QueryKind::Insert;
        insert.return_type = ReturnType::One;
        insert
    }

    async fn create_if_missing(&self, db: &Db, data: CreateData) -> QbResult<Record> {
        let read = self.guard_read();
        if let Some(row) = read.perform(db).await?.into_record() {
            return Ok(row);
        }

        let data = data.resolve()?;
        let insert = self.guarded_insert(data);
        if let Some(row) = insert.perform(db).await?.into_record() {
            return Ok(row);
        }

        // Lost the race: someone else inserted between the read and the write.
        match read.perform(db).await?.into_record() {
            Some(row) => Ok(row),
            None => {
                tracing::error!(
                    target: "pgqb.query",
                    table = %self.alias(),
                    "row neither found nor created"
                );
                Err(QbError::Consistency(format!(
                    "`{}`: the row was neither found nor created",
                    self.alias()
                )))
            }
        }
    }
}
