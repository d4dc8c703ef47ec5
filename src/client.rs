use std::fmt;
use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio_util::sync::CancellationToken;

use crate::{
    attempt::run_with_timeout,
    retry::{retry, retry_on},
    Driver, ExecResult, FromRow, Params, QueryResult, ResilientNamedStatement,
    ResilientStatement, Result, RetryConfig, Value,
};

/// Database client whose every call is retried according to a [`RetryConfig`].
///
/// A client built with [`ResilientClient::disconnected`] or `Default`, or one
/// that has been closed, is inert: every verb returns
/// [`RetryDbError::NotConnected`](crate::RetryDbError::NotConnected) before
/// any attempt is made. Clones share the same underlying driver, so closing
/// any of them makes all of them inert.
pub struct ResilientClient<D: Driver> {
    driver: Option<Arc<D>>,
    closed: Arc<AtomicBool>,
    config: RetryConfig,
}

impl<D: Driver> Clone for ResilientClient<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            closed: self.closed.clone(),
            config: self.config,
        }
    }
}

impl<D: Driver> Default for ResilientClient<D> {
    fn default() -> Self {
        Self::disconnected(RetryConfig::default())
    }
}

impl<D: Driver> fmt::Debug for ResilientClient<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("connected", &self.is_connected())
            .field("config", &self.config)
            .finish()
    }
}

impl<D: Driver> ResilientClient<D> {
    /// Inert client carrying `config`.
    pub fn disconnected(config: RetryConfig) -> Self {
        Self {
            driver: None,
            closed: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Wraps an already opened driver.
    pub fn from_driver(driver: D, config: RetryConfig) -> Self {
        Self {
            driver: Some(Arc::new(driver)),
            closed: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Opens `datasource` and pings it once, without retrying.
    ///
    /// The single attempt is bounded by the default
    /// [`RetryConfig::attempt_timeout`]; the client gets the default
    /// [`RetryConfig`] for later calls.
    pub async fn connect(datasource: &str) -> Result<Self> {
        let config = RetryConfig::default();
        let datasource = datasource.to_owned();
        let driver = run_with_timeout(
            |cancel| Self::open_checked(async move { D::open(&datasource).await }, cancel),
            config.attempt_timeout,
        )
        .await
        .into_result(config.attempt_timeout)?;
        Ok(Self::from_driver(driver, config))
    }

    /// Opens and pings `datasource` under `config`, retrying failures.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use retrydb::{HttpDriver, ResilientClient, RetryConfig, Strategy};
    ///
    /// # async fn run() -> retrydb::Result<()> {
    /// let config = RetryConfig::default()
    ///     .with_attempts(5)
    ///     .with_strategy(Strategy::Exponential)
    ///     .with_base_delay(Duration::from_millis(50))
    ///     .with_max_delay(Duration::from_secs(1));
    /// let db = ResilientClient::<HttpDriver>::connect_with_retry(
    ///     "libsql://my-db.example.com?authToken=secret",
    ///     config,
    /// )
    /// .await?;
    /// # drop(db);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect_with_retry(datasource: &str, config: RetryConfig) -> Result<Self> {
        let datasource: Arc<str> = Arc::from(datasource);
        Self::connect_with(config, move || {
            let datasource = datasource.clone();
            async move { D::open(&datasource).await }
        })
        .await
    }

    /// Like [`connect_with_retry`](Self::connect_with_retry) with a custom
    /// opener. Each attempt calls `opener` once and pings the new driver.
    pub async fn connect_with<F, Fut>(config: RetryConfig, mut opener: F) -> Result<Self>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<D>> + Send + 'static,
    {
        let driver = retry(&config, "connect", |cancel| {
            Self::open_checked(opener(), cancel)
        })
        .await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(attempts = config.attempts, "connected");

        Ok(Self::from_driver(driver, config))
    }

    /// Opens a driver and pings it; a driver that fails the ping is closed.
    async fn open_checked<Fut>(open: Fut, cancel: CancellationToken) -> Result<D>
    where
        Fut: Future<Output = Result<D>>,
    {
        let driver = open.await?;
        if let Err(err) = driver.ping(&cancel).await {
            let _ = driver.close().await;
            return Err(err);
        }
        Ok(driver)
    }

    /// Replaces the retry policy used by later calls.
    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.live().is_some()
    }

    /// Underlying driver, if connected.
    pub fn driver(&self) -> Option<&D> {
        self.live().map(Arc::as_ref)
    }

    /// Driver handle, unless this client or a clone of it was closed.
    fn live(&self) -> Option<&Arc<D>> {
        self.driver
            .as_ref()
            .filter(|_| !self.closed.load(Ordering::Acquire))
    }

    /// Checks the database is reachable.
    pub async fn ping(&self) -> Result<()> {
        retry_on(self.live(), &self.config, "ping", |driver, cancel| async move {
            driver.ping(&cancel).await
        })
        .await
    }

    /// Runs a row-returning statement.
    pub async fn query<P: Into<Params>>(&self, sql: &str, params: P) -> Result<QueryResult> {
        self.run_query("query", sql, params.into()).await
    }

    /// Runs a statement for its side effects.
    pub async fn execute<P: Into<Params>>(&self, sql: &str, params: P) -> Result<ExecResult> {
        self.run_execute("execute", sql, params.into()).await
    }

    /// Runs a row-returning statement with named arguments.
    pub async fn named_query<I, K>(&self, sql: &str, args: I) -> Result<QueryResult>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.run_query("named_query", sql, Params::named(args))
            .await
    }

    /// Runs a statement with named arguments for its side effects.
    pub async fn named_execute<I, K>(&self, sql: &str, args: I) -> Result<ExecResult>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.run_execute("named_execute", sql, Params::named(args))
            .await
    }

    /// Maps the first row of the result into `T`.
    ///
    /// Only the query is retried. An empty result returns
    /// [`RetryDbError::NoRows`](crate::RetryDbError::NoRows) and a row that
    /// does not fit `T` returns a decode error, neither of them retried.
    pub async fn get<T, P>(&self, sql: &str, params: P) -> Result<T>
    where
        T: FromRow,
        P: Into<Params>,
    {
        self.run_query("get", sql, params.into())
            .await?
            .first_as()
    }

    /// Maps every row of the result into `T`.
    pub async fn select<T, P>(&self, sql: &str, params: P) -> Result<Vec<T>>
    where
        T: FromRow,
        P: Into<Params>,
    {
        self.run_query("select", sql, params.into())
            .await?
            .rows_as()
    }

    /// Prepares `sql`; the statement keeps a copy of this client's config.
    pub async fn prepare(&self, sql: &str) -> Result<ResilientStatement<D>> {
        let sql: Arc<str> = Arc::from(sql);
        let statement = retry_on(self.live(), &self.config, "prepare", |driver, cancel| {
            let sql = sql.clone();
            async move { driver.prepare(&sql, &cancel).await }
        })
        .await?;
        Ok(ResilientStatement::new(statement, self.config))
    }

    /// Prepares `sql` for execution with named arguments.
    pub async fn prepare_named(&self, sql: &str) -> Result<ResilientNamedStatement<D>> {
        let sql: Arc<str> = Arc::from(sql);
        let statement = retry_on(
            self.live(),
            &self.config,
            "prepare_named",
            |driver, cancel| {
                let sql = sql.clone();
                async move { driver.prepare_named(&sql, &cancel).await }
            },
        )
        .await?;
        Ok(ResilientNamedStatement::new(statement, self.config))
    }

    /// Closes the driver. The client and every clone sharing its driver are
    /// inert afterwards; closing again, from any of them, is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(driver) = self.driver.take() else {
            return Ok(());
        };
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        driver.close().await
    }

    async fn run_query(&self, operation: &str, sql: &str, params: Params) -> Result<QueryResult> {
        let sql: Arc<str> = Arc::from(sql);
        retry_on(self.live(), &self.config, operation, |driver, cancel| {
            let sql = sql.clone();
            let params = params.clone();
            async move { driver.query(&sql, params, &cancel).await }
        })
        .await
    }

    async fn run_execute(&self, operation: &str, sql: &str, params: Params) -> Result<ExecResult> {
        let sql: Arc<str> = Arc::from(sql);
        retry_on(self.live(), &self.config, operation, |driver, cancel| {
            let sql = sql.clone();
            let params = params.clone();
            async move { driver.execute(&sql, params, &cancel).await }
        })
        .await
    }
}
