//! In-memory adapter for tests: records every statement and answers queries
//! through a handler closure.

use super::{Adapter, ArraysOutput, Connection, Field, QueryOutput};
use crate::compiler::CompiledSql;
use crate::error::QbResult;
use crate::record::Record;
use crate::value::Value;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub(crate) type Handler = Arc<dyn Fn(&str, &[Value]) -> QbResult<Vec<Record>> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct MockAdapter {
    log: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    handler: Handler,
}

impl MockAdapter {
    pub(crate) fn new() -> Self {
        Self::with_handler(|_, _| Ok(Vec::new()))
    }

    pub(crate) fn with_handler(
        handler: impl Fn(&str, &[Value]) -> QbResult<Vec<Record>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            handler: Arc::new(handler),
        }
    }

    /// Every statement sent so far, transaction control included.
    pub(crate) fn statements(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub(crate) fn values(&self) -> Vec<Vec<Value>> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, values)| values.clone())
            .collect()
    }

    pub(crate) fn query_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    async fn run(&self, sql: &CompiledSql) -> QbResult<Vec<Record>> {
        // Give concurrently running tasks a chance to interleave.
        tokio::task::yield_now().await;
        self.log
            .lock()
            .unwrap()
            .push((sql.text.clone(), sql.values.clone()));
        (self.handler)(&sql.text, &sql.values)
    }

    async fn run_query(&self, sql: &CompiledSql) -> QbResult<QueryOutput> {
        let rows = self.run(sql).await?;
        Ok(QueryOutput {
            row_count: rows.len() as u64,
            rows,
        })
    }

    async fn run_arrays(&self, sql: &CompiledSql) -> QbResult<ArraysOutput> {
        let records = self.run(sql).await?;
        let fields = records
            .first()
            .map(|r| {
                r.keys()
                    .map(|k| Field {
                        name: k.to_string(),
                        type_name: "unknown".to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let rows: Vec<Vec<Value>> = records
            .into_iter()
            .map(|r| r.into_iter().map(|(_, v)| v).collect())
            .collect();
        Ok(ArraysOutput {
            fields,
            row_count: rows.len() as u64,
            rows,
        })
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn query(&self, sql: &CompiledSql, _prepare: bool) -> QbResult<QueryOutput> {
        self.run_query(sql).await
    }

    async fn arrays(&self, sql: &CompiledSql, _prepare: bool) -> QbResult<ArraysOutput> {
        self.run_arrays(sql).await
    }

    async fn acquire(&self) -> QbResult<Box<dyn Connection>> {
        Ok(Box::new(MockConnection {
            adapter: self.clone(),
        }))
    }

    async fn close(&self) {}
}

pub(crate) struct MockConnection {
    adapter: MockAdapter,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&mut self, sql: &CompiledSql, _prepare: bool) -> QbResult<QueryOutput> {
        self.adapter.run_query(sql).await
    }

    async fn arrays(&mut self, sql: &CompiledSql, _prepare: bool) -> QbResult<ArraysOutput> {
        self.adapter.run_arrays(sql).await
    }

    async fn execute(&mut self, sql: &str) -> QbResult<()> {
        self.adapter.run(&CompiledSql::new(sql)).await.map(|_| ())
    }
}
