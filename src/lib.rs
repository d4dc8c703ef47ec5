//! `retrydb` puts a retry and timeout layer in front of a database client.
//!
//! Any client implementing [`Driver`] can be wrapped; the crate ships
//! [`HttpDriver`] for the libSQL `/v2/pipeline` endpoint. Every call made
//! through [`ResilientClient`] and its prepared statements is:
//! - retried up to [`RetryConfig::attempts`] times, waiting between attempts
//!   according to the [`Strategy`]
//! - bounded per attempt by [`RetryConfig::attempt_timeout`]
//! - bounded overall by [`RetryConfig::deadline`]
//!
//! Abandoned attempts are cancelled through the [`CancellationToken`] handed
//! to the driver.
//!
//! ```no_run
//! use retrydb::{HttpDriver, ResilientClient, RetryConfig, Value};
//!
//! # async fn run() -> retrydb::Result<()> {
//! let db = ResilientClient::<HttpDriver>::connect_with_retry(
//!     "libsql://my-db.example.com?authToken=secret",
//!     RetryConfig::from_env()?,
//! )
//! .await?;
//! let (id, name): (i64, String) = db
//!     .get("SELECT id, name FROM users WHERE id = ?", [Value::integer(1)])
//!     .await?;
//! # let _ = (id, name);
//! # Ok(())
//! # }
//! ```

mod attempt;
pub mod backoff;
mod client;
mod driver;
mod error;
mod http;
mod options;
mod params;
mod retry;
mod row_map;
mod statement;
mod types;
mod value;

pub use attempt::{run_with_timeout, AttemptOutcome};
pub use backoff::Strategy;
pub use client::ResilientClient;
pub use driver::{Driver, PreparedStatement};
pub use error::RetryDbError;
pub use http::{HttpDriver, HttpStatement};
pub use options::RetryConfig;
pub use params::Params;
pub use retry::retry;
pub use row_map::{FromRow, FromValue, RowRef};
pub use statement::{ResilientNamedStatement, ResilientStatement};
pub use tokio_util::sync::CancellationToken;
pub use types::{Col, ExecResult, QueryResult};
pub use value::Value;

pub type Result<T> = std::result::Result<T, RetryDbError>;
