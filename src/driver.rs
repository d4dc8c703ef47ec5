//! Contract of the database client wrapped by [`ResilientClient`](crate::ResilientClient).
//!
//! Every call receives the [`CancellationToken`] of the attempt it runs in.
//! The token fires when the attempt times out or the retry sequence passes
//! its deadline; implementations should stop work and return
//! [`RetryDbError::Cancelled`](crate::RetryDbError::Cancelled).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{ExecResult, Params, QueryResult, Result};

/// Open connection (or pool) to a database.
#[async_trait]
pub trait Driver: Send + Sync + Sized + 'static {
    /// Prepared statement handle produced by [`Driver::prepare`].
    type Statement: PreparedStatement;

    /// Opens a handle for `datasource`. Does not need to touch the network.
    async fn open(datasource: &str) -> Result<Self>;

    /// Verifies the database is reachable.
    async fn ping(&self, cancel: &CancellationToken) -> Result<()>;

    /// Runs a row-returning statement.
    async fn query(&self, sql: &str, params: Params, cancel: &CancellationToken)
        -> Result<QueryResult>;

    /// Runs a statement for its side effects.
    async fn execute(
        &self,
        sql: &str,
        params: Params,
        cancel: &CancellationToken,
    ) -> Result<ExecResult>;

    /// Prepares `sql` for repeated execution.
    async fn prepare(&self, sql: &str, cancel: &CancellationToken) -> Result<Self::Statement>;

    /// Prepares `sql` for execution with named arguments only.
    async fn prepare_named(&self, sql: &str, cancel: &CancellationToken)
        -> Result<Self::Statement> {
        self.prepare(sql, cancel).await
    }

    /// Releases the handle.
    async fn close(&self) -> Result<()>;
}

/// Statement prepared by a [`Driver`].
#[async_trait]
pub trait PreparedStatement: Send + Sync + 'static {
    async fn query(&self, params: Params, cancel: &CancellationToken) -> Result<QueryResult>;

    async fn execute(&self, params: Params, cancel: &CancellationToken) -> Result<ExecResult>;

    async fn close(&self) -> Result<()>;
}
