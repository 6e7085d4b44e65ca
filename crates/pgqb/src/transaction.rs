//! Transactions and savepoints.
//!
//! The active transaction is carried in a task-local context, so queries run
//! inside the body of [`Db::transaction`] pick up its connection without
//! threading a handle through every call:
//!
//! ```ignore
//! db.transaction(|| async {
//!     users.query().create(record! { "name" => "a" }).run(&db).await?;
//!
//!     // Nested calls become savepoints; an error here rolls back only
//!     // the savepoint.
//!     let _ = db
//!         .transaction(|| async { audit.query().insert(entry).run(&db).await })
//!         .await;
//!     Ok(())
//! })
//! .await?;
//! ```
//!
//! Savepoints are named by a counter that starts at 1 for every outermost
//! transaction. After-commit hooks queued inside a savepoint that rolls back
//! are discarded; the rest run once the outermost transaction commits.

use crate::adapter::Connection;
use crate::db::Db;
use crate::error::{QbError, QbResult};
use crate::ident;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) type CommitHook = Box<dyn FnOnce() -> QbResult<()> + Send>;

tokio::task_local! {
    static CURRENT: Arc<TransactionContext>;
}

/// State of one outermost transaction.
pub(crate) struct TransactionContext {
    db_id: u64,
    pub(crate) conn: tokio::sync::Mutex<Box<dyn Connection>>,
    savepoint: AtomicU32,
    after_commit: Mutex<Vec<CommitHook>>,
}

impl TransactionContext {
    fn new(db_id: u64, conn: Box<dyn Connection>) -> Self {
        Self {
            db_id,
            conn: tokio::sync::Mutex::new(conn),
            savepoint: AtomicU32::new(1),
            after_commit: Mutex::new(Vec::new()),
        }
    }

    /// Queue a hook to run after the outermost commit.
    pub(crate) fn defer(&self, hook: CommitHook) {
        self.hooks().push(hook);
    }

    fn hooks(&self) -> std::sync::MutexGuard<'_, Vec<CommitHook>> {
        self.after_commit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The transaction of `db` active in the current task, if any.
pub(crate) fn current(db_id: u64) -> Option<Arc<TransactionContext>> {
    CURRENT
        .try_with(Arc::clone)
        .ok()
        .filter(|ctx| ctx.db_id == db_id)
}

/// Isolation level for `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options of an outermost transaction; ignored for savepoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: Option<bool>,
    pub deferrable: Option<bool>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = Some(deferrable);
        self
    }

    pub(crate) fn begin_sql(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(level) = self.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(level.as_sql());
        }
        match self.read_only {
            Some(true) => sql.push_str(" READ ONLY"),
            Some(false) => sql.push_str(" READ WRITE"),
            None => {}
        }
        match self.deferrable {
            Some(true) => sql.push_str(" DEFERRABLE"),
            Some(false) => sql.push_str(" NOT DEFERRABLE"),
            None => {}
        }
        sql
    }
}

fn with_rollback_error(error: QbError, rollback: QbError) -> QbError {
    QbError::Other(format!("{error} (rollback failed: {rollback})"))
}

impl Db {
    /// Run `f` in a transaction: a new one, or a savepoint when this task is
    /// already inside a transaction of this database.
    ///
    /// Commits (or releases the savepoint) when `f` returns `Ok`, rolls back
    /// and re-raises when it returns `Err`.
    pub async fn transaction<T, F, Fut>(&self, f: F) -> QbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QbResult<T>>,
    {
        self.transaction_with(TransactionOptions::default(), f).await
    }

    pub async fn transaction_with<T, F, Fut>(&self, options: TransactionOptions, f: F) -> QbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QbResult<T>>,
    {
        match current(self.id()) {
            Some(ctx) => self.savepoint(&ctx, f).await,
            None => self.outermost(options, f).await,
        }
    }

    /// Run `f` in the current transaction, starting one if there is none.
    /// Never creates a savepoint.
    pub async fn ensure_transaction<T, F, Fut>(&self, f: F) -> QbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QbResult<T>>,
    {
        if current(self.id()).is_some() {
            f().await
        } else {
            self.outermost(TransactionOptions::default(), f).await
        }
    }

    /// True when the current task is inside a transaction of this database.
    pub fn in_transaction(&self) -> bool {
        current(self.id()).is_some()
    }

    async fn outermost<T, F, Fut>(&self, options: TransactionOptions, f: F) -> QbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QbResult<T>>,
    {
        let conn = self.adapter().acquire().await?;
        let ctx = Arc::new(TransactionContext::new(self.id(), conn));

        self.control(&ctx, &options.begin_sql()).await?;
        tracing::debug!(target: "pgqb.transaction", "transaction started");

        match CURRENT.scope(ctx.clone(), f()).await {
            Ok(value) => {
                self.control(&ctx, "COMMIT").await?;
                tracing::debug!(target: "pgqb.transaction", "transaction committed");

                let hooks = std::mem::take(&mut *ctx.hooks());
                let mut first_error = None;
                for hook in hooks {
                    if let Err(e) = hook() {
                        tracing::warn!(target: "pgqb.transaction", error = %e, "after-commit hook failed");
                        first_error.get_or_insert(e);
                    }
                }
                match first_error {
                    Some(e) => Err(e),
                    None => Ok(value),
                }
            }
            Err(error) => {
                let rolled_back = self.control(&ctx, "ROLLBACK").await;
                tracing::debug!(target: "pgqb.transaction", error = %error, "transaction rolled back");
                match rolled_back {
                    Ok(()) => Err(error),
                    Err(rollback) => Err(with_rollback_error(error, rollback)),
                }
            }
        }
    }

    async fn savepoint<T, F, Fut>(&self, ctx: &TransactionContext, f: F) -> QbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QbResult<T>>,
    {
        let name = ident::savepoint_name(ctx.savepoint.fetch_add(1, Ordering::SeqCst));
        self.control(ctx, &format!("SAVEPOINT {name}")).await?;
        let mark = ctx.hooks().len();

        match f().await {
            Ok(value) => {
                self.control(ctx, &format!("RELEASE SAVEPOINT {name}")).await?;
                Ok(value)
            }
            Err(error) => {
                ctx.hooks().truncate(mark);
                match self.control(ctx, &format!("ROLLBACK TO SAVEPOINT {name}")).await {
                    Ok(()) => Err(error),
                    Err(rollback) => Err(with_rollback_error(error, rollback)),
                }
            }
        }
    }
}
