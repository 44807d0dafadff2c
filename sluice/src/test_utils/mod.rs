//! Shared fakes for exercising the engine without any network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::connections::{Connect, ConnectionParams, DialectAdapter, EngineType};
use crate::error::{ErrorKind, SluiceResult};
use crate::sluice_error;
use crate::types::{Row, RowStream, Statement};

/// A scripted [`DialectAdapter`] that records every statement it executes.
///
/// `query` answers from substring-matched routes, `query_stream` replays the
/// configured rows, and everything (including `query_unsafe`) is appended to
/// the execution log for assertions.
#[derive(Default)]
pub struct StaticAdapter {
    executed: Mutex<Vec<String>>,
    routes: Mutex<Vec<(String, Vec<Row>)>>,
    fail_routes: Mutex<Vec<String>>,
    stream_rows: Mutex<Vec<Row>>,
}

impl StaticAdapter {
    /// An adapter that answers every query with zero rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Routes queries whose SQL contains `needle` to the given rows.
    ///
    /// Later routes shadow earlier ones, so a test can re-route a query
    /// between runs.
    pub fn route(&self, needle: impl Into<String>, rows: Vec<Row>) {
        self.routes.lock().unwrap().push((needle.into(), rows));
    }

    /// Makes queries whose SQL contains `needle` fail with a database error.
    pub fn fail_on(&self, needle: impl Into<String>) {
        self.fail_routes.lock().unwrap().push(needle.into());
    }

    /// Sets the rows replayed by `query_stream`.
    pub fn set_stream_rows(&self, rows: Vec<Row>) {
        *self.stream_rows.lock().unwrap() = rows;
    }

    /// Returns every SQL text executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn record(&self, sql: &str) {
        self.executed.lock().unwrap().push(sql.to_string());
    }

    fn check_failure(&self, sql: &str) -> SluiceResult<()> {
        let failing = self
            .fail_routes
            .lock()
            .unwrap()
            .iter()
            .any(|needle| sql.contains(needle.as_str()));

        if failing {
            return Err(sluice_error!(
                ErrorKind::DatabaseError,
                "Scripted statement failure",
                sql.to_string()
            ));
        }

        Ok(())
    }

    fn answer(&self, sql: &str) -> Vec<Row> {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DialectAdapter for StaticAdapter {
    async fn query(&self, statement: &Statement) -> SluiceResult<Vec<Row>> {
        self.record(&statement.sql);
        self.check_failure(&statement.sql)?;

        Ok(self.answer(&statement.sql))
    }

    async fn query_unsafe(&self, sql: &str) -> SluiceResult<Vec<Row>> {
        self.record(sql);
        self.check_failure(sql)?;

        Ok(self.answer(sql))
    }

    async fn query_stream(&self, statement: &Statement) -> SluiceResult<RowStream> {
        self.record(&statement.sql);
        let rows = self.stream_rows.lock().unwrap().clone();

        Ok(Box::pin(futures::stream::iter(rows.into_iter().map(Ok))))
    }
}

/// A [`Connect`] implementation handing out pre-registered fake adapters.
///
/// Engines without a registered adapter are treated as unreachable, which
/// doubles as the connection-refused path in scenario tests.
#[derive(Default)]
pub struct TestConnector {
    adapters: Mutex<HashMap<EngineType, Arc<StaticAdapter>>>,
}

impl TestConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the adapter handed out for an engine.
    pub fn register(&self, engine: EngineType, adapter: Arc<StaticAdapter>) {
        self.adapters.lock().unwrap().insert(engine, adapter);
    }
}

#[async_trait]
impl Connect for TestConnector {
    async fn connect(&self, params: &ConnectionParams) -> SluiceResult<Arc<dyn DialectAdapter>> {
        let adapter = self.adapters.lock().unwrap().get(&params.engine).cloned();

        adapter
            .map(|adapter| adapter as Arc<dyn DialectAdapter>)
            .ok_or_else(|| {
                sluice_error!(
                    ErrorKind::ConnectionRefused,
                    "Connection refused",
                    params.engine
                )
            })
    }
}
