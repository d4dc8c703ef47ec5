//! Driver for the libSQL `/v2/pipeline` SQL-over-HTTP protocol.
//!
//! Each call is one `POST` carrying the statement followed by a `close`
//! request. The driver never retries on its own; wrap it in a
//! [`ResilientClient`](crate::ResilientClient) for that.

mod decode;
mod wire;

use std::fmt;

use async_trait::async_trait;
use reqwest::{header, Url};
use tokio_util::sync::CancellationToken;

use crate::{
    Driver, ExecResult, Params, PreparedStatement, QueryResult, Result, RetryDbError,
};
use wire::{PipelineRequest, Request};

const PIPELINE_PATH: &str = "/v2/pipeline";

#[derive(Clone)]
/// HTTP client for a libSQL pipeline endpoint.
pub struct HttpDriver {
    http: reqwest::Client,
    pipeline_url: String,
    authorization: Option<String>,
}

impl fmt::Debug for HttpDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDriver")
            .field("pipeline_url", &self.pipeline_url)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl HttpDriver {
    /// Creates a driver for a full pipeline URL and an optional token.
    ///
    /// A token missing the `Bearer ` prefix gets it added.
    pub fn new(pipeline_url: impl Into<String>, token: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            pipeline_url: pipeline_url.into(),
            authorization: token.map(normalize_bearer_authorization),
        }
    }

    /// Parses a datasource string.
    ///
    /// Accepted forms:
    /// - `libsql://<host>?authToken=<token>`
    /// - `https://<host>[/v2/pipeline]?authToken=<token>`
    /// - `http://<host>:<port>[/v2/pipeline]`
    ///
    /// `libsql://` is served over HTTPS and `/v2/pipeline` is appended when
    /// the path does not already end with it.
    pub fn from_datasource(datasource: &str) -> Result<Self> {
        let (pipeline_url, token) = parse_datasource(datasource)?;
        Ok(Self::new(pipeline_url, token.as_deref()))
    }

    /// Creates a driver from environment variables.
    ///
    /// Reads:
    /// - `RETRYDB_DATABASE_URL`: datasource, see [`HttpDriver::from_datasource`]
    /// - `RETRYDB_AUTH_TOKEN`: optional token, overrides `authToken` in the URL
    pub fn from_env() -> Result<Self> {
        let datasource = std::env::var("RETRYDB_DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                RetryDbError::InvalidDatasource(
                    "missing RETRYDB_DATABASE_URL environment variable".to_owned(),
                )
            })?;
        let mut driver = Self::from_datasource(&datasource)?;
        if let Some(token) = std::env::var("RETRYDB_AUTH_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            driver.authorization = Some(normalize_bearer_authorization(&token));
        }
        Ok(driver)
    }

    /// Uses a preconfigured `reqwest` client, e.g. with custom TLS roots.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn pipeline_url(&self) -> &str {
        &self.pipeline_url
    }

    async fn send(&self, request: Request, cancel: &CancellationToken) -> Result<wire::Response> {
        let payload = PipelineRequest::single(request);
        tokio::select! {
            _ = cancel.cancelled() => Err(RetryDbError::Cancelled),
            response = self.post(&payload) => decode::single_response(response?),
        }
    }

    async fn post(&self, payload: &PipelineRequest) -> Result<wire::PipelineResponse> {
        let mut request = self.http.post(&self.pipeline_url).json(payload);
        if let Some(authorization) = &self.authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        let response = request.send().await.map_err(RetryDbError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(RetryDbError::Transport)?;

        if !status.is_success() {
            return Err(RetryDbError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|err| {
            RetryDbError::Decode(format!(
                "invalid pipeline response JSON: {err}; body: {body}"
            ))
        })
    }

    async fn execute_statement(
        &self,
        sql: &str,
        params: Params,
        want_rows: bool,
        cancel: &CancellationToken,
    ) -> Result<wire::ExecuteResult> {
        let stmt = decode::encode_statement(sql, params, want_rows)?;
        let response = self.send(Request::Execute { stmt }, cancel).await?;
        decode::expect_execute(response)
    }

    async fn describe(&self, sql: &str, cancel: &CancellationToken) -> Result<HttpStatement> {
        let request = Request::Describe {
            sql: sql.to_owned(),
        };
        let described = decode::expect_describe(self.send(request, cancel).await?)?;

        Ok(HttpStatement {
            driver: self.clone(),
            sql: sql.to_owned(),
            params: described
                .params
                .into_iter()
                .map(|param| param.name)
                .collect(),
            columns: described.cols.into_iter().map(|col| col.name).collect(),
            readonly: described.is_readonly,
        })
    }
}

#[async_trait]
impl Driver for HttpDriver {
    type Statement = HttpStatement;

    async fn open(datasource: &str) -> Result<Self> {
        Self::from_datasource(datasource)
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        self.execute_statement("SELECT 1", Params::default(), true, cancel)
            .await
            .map(drop)
    }

    async fn query(
        &self,
        sql: &str,
        params: Params,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        self.execute_statement(sql, params, true, cancel)
            .await?
            .try_into()
    }

    async fn execute(
        &self,
        sql: &str,
        params: Params,
        cancel: &CancellationToken,
    ) -> Result<ExecResult> {
        self.execute_statement(sql, params, false, cancel)
            .await?
            .try_into()
    }

    async fn prepare(&self, sql: &str, cancel: &CancellationToken) -> Result<HttpStatement> {
        self.describe(sql, cancel).await
    }

    async fn prepare_named(&self, sql: &str, cancel: &CancellationToken) -> Result<HttpStatement> {
        let statement = self.describe(sql, cancel).await?;
        if let Some(index) = statement.params.iter().position(|name| !is_named_param(name)) {
            return Err(RetryDbError::Decode(format!(
                "parameter {} of a named statement has no name",
                index + 1
            )));
        }
        Ok(statement)
    }

    async fn close(&self) -> Result<()> {
        // Pipelines are closed per request; nothing is held server-side.
        Ok(())
    }
}

/// Statement described by the server, executed by SQL text.
#[derive(Clone, Debug)]
pub struct HttpStatement {
    driver: HttpDriver,
    sql: String,
    params: Vec<Option<String>>,
    columns: Vec<String>,
    readonly: bool,
}

impl HttpStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter names as reported by the server, `None` for bare `?`.
    pub fn params(&self) -> &[Option<String>] {
        &self.params
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn check_arity(&self, params: &Params) -> Result<()> {
        if let Params::Positional(values) = params {
            if values.len() != self.params.len() {
                return Err(RetryDbError::Decode(format!(
                    "statement expects {} arguments, got {}",
                    self.params.len(),
                    values.len()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PreparedStatement for HttpStatement {
    async fn query(&self, params: Params, cancel: &CancellationToken) -> Result<QueryResult> {
        self.check_arity(&params)?;
        self.driver.query(&self.sql, params, cancel).await
    }

    async fn execute(&self, params: Params, cancel: &CancellationToken) -> Result<ExecResult> {
        self.check_arity(&params)?;
        self.driver.execute(&self.sql, params, cancel).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn is_named_param(name: &Option<String>) -> bool {
    name.as_deref()
        .is_some_and(|name| !name.starts_with('?') && decode::strip_parameter_prefix(name).is_ok())
}

fn parse_datasource(datasource: &str) -> Result<(String, Option<String>)> {
    let trimmed = datasource.trim();
    let normalized = match trimmed.strip_prefix("libsql://") {
        Some(rest) => format!("https://{rest}"),
        None => trimmed.to_owned(),
    };

    let mut url = Url::parse(&normalized)
        .map_err(|err| RetryDbError::InvalidDatasource(format!("'{trimmed}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RetryDbError::InvalidDatasource(format!(
            "unsupported scheme '{}' in '{trimmed}'",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(RetryDbError::InvalidDatasource(format!(
            "missing host in '{trimmed}'"
        )));
    }

    let token = url
        .query_pairs()
        .find(|(key, _)| key == "authToken" || key == "auth_token")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty());
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path().trim_end_matches('/');
    let path = if path.ends_with(PIPELINE_PATH) {
        path.to_owned()
    } else {
        format!("{path}{PIPELINE_PATH}")
    };
    url.set_path(&path);

    Ok((url.to_string(), token))
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
