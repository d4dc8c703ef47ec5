//! Prepared statements returned by [`ResilientClient::prepare`](crate::ResilientClient::prepare)
//! and [`ResilientClient::prepare_named`](crate::ResilientClient::prepare_named).
//!
//! A statement carries a copy of the config of the client that prepared it.
//! It must be closed explicitly; once closed, through the statement or any of
//! its clones, every verb fails with
//! [`RetryDbError::NotConnected`](crate::RetryDbError::NotConnected).

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    retry::retry_on, Driver, ExecResult, FromRow, Params, PreparedStatement, QueryResult,
    Result, RetryConfig, Value,
};

/// Prepared statement executed with positional or named parameters.
pub struct ResilientStatement<D: Driver> {
    statement: Option<Arc<D::Statement>>,
    closed: Arc<AtomicBool>,
    config: RetryConfig,
}

impl<D: Driver> Clone for ResilientStatement<D> {
    fn clone(&self) -> Self {
        Self {
            statement: self.statement.clone(),
            closed: self.closed.clone(),
            config: self.config,
        }
    }
}

impl<D: Driver> fmt::Debug for ResilientStatement<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientStatement")
            .field("open", &self.is_open())
            .field("config", &self.config)
            .finish()
    }
}

impl<D: Driver> ResilientStatement<D> {
    pub(crate) fn new(statement: D::Statement, config: RetryConfig) -> Self {
        Self {
            statement: Some(Arc::new(statement)),
            closed: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Statement that was never prepared, or already closed.
    pub fn closed(config: RetryConfig) -> Self {
        Self {
            statement: None,
            closed: Arc::new(AtomicBool::new(true)),
            config,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.live().is_some()
    }

    /// Driver statement, if still open.
    pub fn statement(&self) -> Option<&D::Statement> {
        self.live().map(Arc::as_ref)
    }

    fn live(&self) -> Option<&Arc<D::Statement>> {
        self.statement
            .as_ref()
            .filter(|_| !self.closed.load(Ordering::Acquire))
    }

    pub async fn query<P: Into<Params>>(&self, params: P) -> Result<QueryResult> {
        self.run_query("statement.query", params.into()).await
    }

    pub async fn execute<P: Into<Params>>(&self, params: P) -> Result<ExecResult> {
        self.run_execute("statement.execute", params.into()).await
    }

    /// Maps the first row into `T`; only the query is retried.
    pub async fn get<T, P>(&self, params: P) -> Result<T>
    where
        T: FromRow,
        P: Into<Params>,
    {
        self.run_query("statement.get", params.into())
            .await?
            .first_as()
    }

    pub async fn select<T, P>(&self, params: P) -> Result<Vec<T>>
    where
        T: FromRow,
        P: Into<Params>,
    {
        self.run_query("statement.select", params.into())
            .await?
            .rows_as()
    }

    /// Releases the driver statement. Closing again, from this statement or
    /// a clone, is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(statement) = self.statement.take() else {
            return Ok(());
        };
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        statement.close().await
    }

    async fn run_query(&self, operation: &str, params: Params) -> Result<QueryResult> {
        retry_on(self.live(), &self.config, operation, |statement, cancel| {
            let params = params.clone();
            async move { statement.query(params, &cancel).await }
        })
        .await
    }

    async fn run_execute(&self, operation: &str, params: Params) -> Result<ExecResult> {
        retry_on(self.live(), &self.config, operation, |statement, cancel| {
            let params = params.clone();
            async move { statement.execute(params, &cancel).await }
        })
        .await
    }
}

/// Prepared statement executed with named arguments only.
pub struct ResilientNamedStatement<D: Driver> {
    inner: ResilientStatement<D>,
}

impl<D: Driver> Clone for ResilientNamedStatement<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Driver> fmt::Debug for ResilientNamedStatement<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientNamedStatement")
            .field("open", &self.is_open())
            .field("config", self.config())
            .finish()
    }
}

impl<D: Driver> ResilientNamedStatement<D> {
    pub(crate) fn new(statement: D::Statement, config: RetryConfig) -> Self {
        Self {
            inner: ResilientStatement::new(statement, config),
        }
    }

    pub fn closed(config: RetryConfig) -> Self {
        Self {
            inner: ResilientStatement::closed(config),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        self.inner.config()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    pub fn statement(&self) -> Option<&D::Statement> {
        self.inner.statement()
    }

    pub async fn query<I, K>(&self, args: I) -> Result<QueryResult>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.inner
            .run_query("named_statement.query", Params::named(args))
            .await
    }

    pub async fn execute<I, K>(&self, args: I) -> Result<ExecResult>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.inner
            .run_execute("named_statement.execute", Params::named(args))
            .await
    }

    pub async fn get<T, I, K>(&self, args: I) -> Result<T>
    where
        T: FromRow,
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.inner
            .run_query("named_statement.get", Params::named(args))
            .await?
            .first_as()
    }

    pub async fn select<T, I, K>(&self, args: I) -> Result<Vec<T>>
    where
        T: FromRow,
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.inner
            .run_query("named_statement.select", Params::named(args))
            .await?
            .rows_as()
    }

    pub async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
