//! Database handle.

use crate::adapter::{Adapter, ArraysOutput, QueryOutput};
use crate::compiler::CompiledSql;
use crate::config::DbConfig;
use crate::error::QbResult;
use crate::logger::{Logger, TracingLogger};
use crate::query::Query;
use crate::table::Table;
use crate::transaction::{self, TransactionContext};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A database: an adapter, its configuration and an optional query logger.
///
/// Cheap to clone; clones share the adapter and the transaction identity.
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

struct DbInner {
    id: u64,
    adapter: Arc<dyn Adapter>,
    config: DbConfig,
    logger: Option<Logger>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("id", &self.inner.id)
            .field("schema", &self.inner.config.schema)
            .field("logger", &self.inner.logger)
            .finish_non_exhaustive()
    }
}

async fn logged<T>(
    logger: Option<&Logger>,
    sql: &CompiledSql,
    fut: impl Future<Output = QbResult<T>>,
) -> QbResult<T> {
    let Some(logger) = logger else {
        return fut.await;
    };
    let token = logger.before_query(&sql.text, sql.values.len());
    let result = fut.await;
    match &result {
        Ok(_) => logger.after_query(&sql.text, token),
        Err(e) => logger.on_error(e, &sql.text, token),
    }
    result
}

impl Db {
    pub fn new(adapter: impl Adapter + 'static, config: DbConfig) -> Self {
        let logger = config.log.then(|| Logger::new(TracingLogger::new()));
        Self {
            inner: Arc::new(DbInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                adapter: Arc::new(adapter),
                config,
                logger,
            }),
        }
    }

    /// Connect through a deadpool-postgres pool built from `config`.
    #[cfg(feature = "pool")]
    pub fn connect(config: DbConfig) -> QbResult<Self> {
        let adapter = crate::adapter::PgAdapter::connect(&config)?;
        Ok(Self::new(adapter, config))
    }

    /// Log every query sent through this handle.
    pub fn with_logger(self, logger: Logger) -> Self {
        Self {
            inner: Arc::new(DbInner {
                id: self.inner.id,
                adapter: self.inner.adapter.clone(),
                config: self.inner.config.clone(),
                logger: Some(logger),
            }),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    pub fn adapter(&self) -> &dyn Adapter {
        &*self.inner.adapter
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Start a query over a declared table.
    pub fn table(&self, table: &Table) -> Query {
        table.query()
    }

    pub async fn close(&self) {
        self.inner.adapter.close().await;
    }

    fn logger<'a>(&'a self, query_logger: Option<&'a Logger>) -> Option<&'a Logger> {
        query_logger.or(self.inner.logger.as_ref())
    }

    /// Send on the current transaction's connection, or through the adapter.
    pub(crate) async fn query(
        &self,
        sql: &CompiledSql,
        prepare: bool,
        logger: Option<&Logger>,
    ) -> QbResult<QueryOutput> {
        let logger = self.logger(logger);
        match transaction::current(self.id()) {
            Some(ctx) => {
                logged(logger, sql, async {
                    let mut conn = ctx.conn.lock().await;
                    conn.query(sql, prepare).await
                })
                .await
            }
            None => logged(logger, sql, self.inner.adapter.query(sql, prepare)).await,
        }
    }

    pub(crate) async fn arrays(
        &self,
        sql: &CompiledSql,
        prepare: bool,
        logger: Option<&Logger>,
    ) -> QbResult<ArraysOutput> {
        let logger = self.logger(logger);
        match transaction::current(self.id()) {
            Some(ctx) => {
                logged(logger, sql, async {
                    let mut conn = ctx.conn.lock().await;
                    conn.arrays(sql, prepare).await
                })
                .await
            }
            None => logged(logger, sql, self.inner.adapter.arrays(sql, prepare)).await,
        }
    }

    /// Transaction control statement on `ctx`'s connection.
    pub(crate) async fn control(&self, ctx: &TransactionContext, statement: &str) -> QbResult<()> {
        let sql = CompiledSql::new(statement);
        logged(self.inner.logger.as_ref(), &sql, async {
            let mut conn = ctx.conn.lock().await;
            conn.execute(statement).await
        })
        .await
    }
}
