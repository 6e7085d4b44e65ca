//! Terminals: running a descriptor and reducing its result.

use super::*;
use crate::adapter::{ArraysOutput, QueryOutput};
use crate::db::Db;
use crate::record::Record;
use crate::transaction;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::panic::Location;

/// Result of [`Query::run`], shaped by the query's return type.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    All(Vec<Record>),
    One(Option<Record>),
    Value(Option<Value>),
    Rows(Vec<Vec<Value>>),
    Pluck(Vec<Value>),
    RowCount(u64),
    Void,
}

impl Outcome {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Outcome::All(rows) => rows,
            Outcome::One(row) => row.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Outcome::All(rows) => rows.into_iter().next(),
            Outcome::One(row) => row,
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Outcome::Value(value) => value,
            _ => None,
        }
    }

    pub fn row_count(&self) -> u64 {
        match self {
            Outcome::All(rows) => rows.len() as u64,
            Outcome::One(row) => u64::from(row.is_some()),
            Outcome::Value(value) => u64::from(value.is_some()),
            Outcome::Rows(rows) => rows.len() as u64,
            Outcome::Pluck(values) => values.len() as u64,
            Outcome::RowCount(n) => *n,
            Outcome::Void => 0,
        }
    }
}

/// What the adapter returned, before reduction.
enum Fetched {
    Records(QueryOutput),
    Arrays(ArraysOutput),
}

impl Fetched {
    fn row_count(&self) -> u64 {
        match self {
            Fetched::Records(out) => out.row_count,
            Fetched::Arrays(out) => out.row_count,
        }
    }

    fn into_records(self) -> Vec<Record> {
        match self {
            Fetched::Records(out) => out.rows,
            Fetched::Arrays(_) => Vec::new(),
        }
    }

    fn into_arrays(self) -> Vec<Vec<Value>> {
        match self {
            Fetched::Records(out) => out
                .rows
                .into_iter()
                .map(|r| r.into_iter().map(|(_, v)| v).collect())
                .collect(),
            Fetched::Arrays(out) => out.rows,
        }
    }
}

fn unexpected(outcome: &Outcome) -> QbError {
    QbError::Other(format!("unexpected query outcome: {outcome:?}"))
}

impl Query {
    /// Execute and return the outcome for the query's return type.
    ///
    /// Build errors are returned before anything is sent. Execution errors
    /// carry the caller's source location.
    #[track_caller]
    pub fn run<'a>(&'a self, db: &'a Db) -> impl Future<Output = QbResult<Outcome>> + Send + 'a {
        let location = Location::caller();
        async move { self.perform(db).await.map_err(|e| e.at(location)) }
    }

    #[track_caller]
    pub fn fetch_all(self, db: &Db) -> impl Future<Output = QbResult<Vec<Record>>> + Send + '_ {
        self.all().finish(db, Location::caller(), |outcome| match outcome {
            Outcome::All(rows) => Ok(rows),
            other => Err(unexpected(&other)),
        })
    }

    /// Exactly one row; `NotFound` when there is none.
    #[track_caller]
    pub fn fetch_one(self, db: &Db) -> impl Future<Output = QbResult<Record>> + Send + '_ {
        self.take().finish(db, Location::caller(), |outcome| match outcome {
            Outcome::One(Some(row)) => Ok(row),
            other => Err(unexpected(&other)),
        })
    }

    #[track_caller]
    pub fn fetch_optional(self, db: &Db) -> impl Future<Output = QbResult<Option<Record>>> + Send + '_ {
        self.take_optional().finish(db, Location::caller(), |outcome| match outcome {
            Outcome::One(row) => Ok(row),
            other => Err(unexpected(&other)),
        })
    }

    /// The first column of the first row. Queries not built with
    /// [`get`](Query::get) / [`get_optional`](Query::get_optional) require a row.
    #[track_caller]
    pub fn fetch_value(mut self, db: &Db) -> impl Future<Output = QbResult<Value>> + Send + '_ {
        if !matches!(self.return_type, ReturnType::Value | ReturnType::ValueOrThrow) {
            self.return_type = ReturnType::ValueOrThrow;
        }
        self.finish(db, Location::caller(), |outcome| match outcome {
            Outcome::Value(value) => Ok(value.unwrap_or(Value::Null)),
            other => Err(unexpected(&other)),
        })
    }

    #[track_caller]
    pub fn fetch_pluck(self, db: &Db) -> impl Future<Output = QbResult<Vec<Value>>> + Send + '_ {
        let query = if self.return_type == ReturnType::Pluck {
            self
        } else {
            self.returns_pluck()
        };
        query.finish(db, Location::caller(), |outcome| match outcome {
            Outcome::Pluck(values) => Ok(values),
            other => Err(unexpected(&other)),
        })
    }

    #[track_caller]
    pub fn fetch_rows(self, db: &Db) -> impl Future<Output = QbResult<Vec<Vec<Value>>>> + Send + '_ {
        self.rows().finish(db, Location::caller(), |outcome| match outcome {
            Outcome::Rows(rows) => Ok(rows),
            other => Err(unexpected(&other)),
        })
    }

    /// Affected (or selected) row count.
    #[track_caller]
    pub fn execute(self, db: &Db) -> impl Future<Output = QbResult<u64>> + Send + '_ {
        self.row_count().finish(db, Location::caller(), |outcome| match outcome {
            Outcome::RowCount(n) => Ok(n),
            other => Err(unexpected(&other)),
        })
    }

    /// `true` when at least one row matches.
    #[track_caller]
    pub fn exists(self, db: &Db) -> impl Future<Output = QbResult<bool>> + Send + '_ {
        self.into_exists()
            .finish(db, Location::caller(), |outcome| match outcome {
                Outcome::Value(value) => Ok(value.is_some()),
                other => Err(unexpected(&other)),
            })
    }

    /// `count(*)` of the matching rows.
    #[track_caller]
    pub fn count(self, db: &Db) -> impl Future<Output = QbResult<i64>> + Send + '_ {
        self.into_count()
            .finish(db, Location::caller(), |outcome| match outcome {
                Outcome::Value(value) => Ok(value.and_then(|v| v.as_i64()).unwrap_or(0)),
                other => Err(unexpected(&other)),
            })
    }

    #[track_caller]
    pub fn fetch_all_as<T>(self, db: &Db) -> impl Future<Output = QbResult<Vec<T>>> + Send + '_
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.all().finish(db, Location::caller(), |outcome| match outcome {
            Outcome::All(rows) => rows.iter().map(|r| r.deserialize()).collect(),
            other => Err(unexpected(&other)),
        })
    }

    #[track_caller]
    pub fn fetch_one_as<T>(self, db: &Db) -> impl Future<Output = QbResult<T>> + Send + '_
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.take().finish(db, Location::caller(), |outcome| match outcome {
            Outcome::One(Some(row)) => row.deserialize(),
            other => Err(unexpected(&other)),
        })
    }

    #[track_caller]
    pub fn fetch_optional_as<T>(self, db: &Db) -> impl Future<Output = QbResult<Option<T>>> + Send + '_
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.take_optional()
            .finish(db, Location::caller(), |outcome| match outcome {
                Outcome::One(row) => row.map(|r| r.deserialize()).transpose(),
                other => Err(unexpected(&other)),
            })
    }

    fn returns_pluck(mut self) -> Self {
        self.return_type = ReturnType::Pluck;
        self
    }

    async fn finish<T>(
        self,
        db: &Db,
        location: &'static Location<'static>,
        extract: impl FnOnce(Outcome) -> QbResult<T> + Send,
    ) -> QbResult<T> {
        let outcome = self.perform(db).await.map_err(|e| e.at(location))?;
        extract(outcome)
    }

    // ==================== Pipeline ====================

    pub(crate) async fn perform(&self, db: &Db) -> QbResult<Outcome> {
        self.check()?;
        if self.none {
            let empty = Fetched::Records(QueryOutput::default());
            return self.reduce(empty);
        }
        if self.wrap_in_transaction {
            return db.ensure_transaction(|| self.send(db)).await;
        }
        self.send(db).await
    }

    async fn send(&self, db: &Db) -> QbResult<Outcome> {
        let phase = HookPhase::of(self);
        if let Some(phase) = phase {
            self.hooks.fire_before(phase, self)?;
        }

        let config = db.config();
        let sql = compiler::compile(self, &config.schema)?;
        let prepare = self
            .auto_prepared_statements
            .unwrap_or(config.auto_prepared_statements);
        let wants_rows = phase.is_some_and(|p| self.hooks.wants_rows(p));

        let fetched = if self.return_type.uses_arrays() && !wants_rows {
            let mut out = db
                .arrays(&sql, prepare, self.log.as_ref())
                .await
                .map_err(|e| e.map_unique_columns(&self.shape))?;
            self.parse_arrays(&mut out);
            Fetched::Arrays(out)
        } else {
            let mut out = db
                .query(&sql, prepare, self.log.as_ref())
                .await
                .map_err(|e| e.map_unique_columns(&self.shape))?;
            for record in &mut out.rows {
                self.parse_record(record);
            }
            Fetched::Records(out)
        };

        if let Some(phase) = phase {
            self.after_hooks(db, phase, &fetched)?;
        }
        self.reduce(fetched)
    }

    /// After hooks always fire for selects; for mutations only when rows
    /// were affected. After-commit hooks wait for the surrounding commit.
    fn after_hooks(&self, db: &Db, phase: HookPhase, fetched: &Fetched) -> QbResult<()> {
        if phase != HookPhase::Query && fetched.row_count() == 0 {
            return Ok(());
        }
        let rows: &[Record] = match fetched {
            Fetched::Records(out) => &out.rows,
            Fetched::Arrays(_) => &[],
        };
        self.hooks.fire_after(phase, rows, self)?;

        let commit_hooks = self.hooks.commit_hooks(phase);
        if commit_hooks.is_empty() {
            return Ok(());
        }
        let rows = Arc::new(rows.to_vec());
        let query = Arc::new(self.clone());
        let ctx = transaction::current(db.id());
        for hook in commit_hooks {
            let rows = rows.clone();
            let query = query.clone();
            let run = move || hook(&rows, &query);
            match &ctx {
                Some(ctx) => ctx.defer(Box::new(run)),
                None => run()?,
            }
        }
        Ok(())
    }

    fn parse_value(&self, key: &str, value: Value) -> Value {
        let value = match self.shape.get(key).and_then(|c| c.parse.as_ref()) {
            Some(parse) if !value.is_null() => parse(value),
            _ => value,
        };
        match self.parsers.get(key) {
            Some(parse) => parse(value),
            None => value,
        }
    }

    fn parse_record(&self, record: &mut Record) {
        if self.parsers.is_empty() && self.shape.iter().all(|(_, c)| c.parse.is_none()) {
            return;
        }
        let keys: Vec<String> = record.keys().map(str::to_string).collect();
        for key in keys {
            if let Some(slot) = record.get_mut(&key) {
                let value = std::mem::replace(slot, Value::Null);
                *slot = self.parse_value(&key, value);
            }
        }
    }

    fn parse_arrays(&self, out: &mut ArraysOutput) {
        let names: Vec<String> = out.fields.iter().map(|f| f.name.clone()).collect();
        for row in &mut out.rows {
            for (value, name) in row.iter_mut().zip(&names) {
                let taken = std::mem::replace(value, Value::Null);
                *value = self.parse_value(name, taken);
            }
        }
    }

    fn not_found(&self) -> QbError {
        QbError::not_found(format!("No row found in `{}`", self.alias()))
    }

    /// Shape the adapter output according to the return type.
    fn reduce(&self, fetched: Fetched) -> QbResult<Outcome> {
        let row_count = fetched.row_count();
        match self.return_type {
            ReturnType::All => Ok(Outcome::All(fetched.into_records())),
            ReturnType::One | ReturnType::OneOrThrow => {
                let row = fetched.into_records().into_iter().next();
                let throw = self.return_type == ReturnType::OneOrThrow || self.throw_on_not_found;
                if row.is_none() && throw {
                    return Err(self.not_found());
                }
                Ok(Outcome::One(row))
            }
            ReturnType::Value | ReturnType::ValueOrThrow => {
                let first = fetched
                    .into_arrays()
                    .into_iter()
                    .next()
                    .and_then(|row| row.into_iter().next());
                match first {
                    Some(Value::Null) => Ok(Outcome::Value(Some(
                        self.coalesce_value.clone().unwrap_or(Value::Null),
                    ))),
                    Some(value) => Ok(Outcome::Value(Some(value))),
                    None => {
                        if let Some(default) = &self.not_found_default {
                            return Ok(Outcome::Value(Some(default.clone())));
                        }
                        let throw =
                            self.return_type == ReturnType::ValueOrThrow || self.throw_on_not_found;
                        if throw {
                            return Err(self.not_found());
                        }
                        Ok(Outcome::Value(None))
                    }
                }
            }
            ReturnType::Rows => Ok(Outcome::Rows(fetched.into_arrays())),
            ReturnType::Pluck => Ok(Outcome::Pluck(
                fetched
                    .into_arrays()
                    .into_iter()
                    .map(|row| row.into_iter().next().unwrap_or(Value::Null))
                    .collect(),
            )),
            ReturnType::RowCount => Ok(Outcome::RowCount(row_count)),
            ReturnType::Void => Ok(Outcome::Void),
        }
    }
}
