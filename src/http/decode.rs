use super::wire::{self, ExecuteStatement, NamedArg};
use crate::{Col, ExecResult, Params, QueryResult, RetryDbError, Value};

/// Unpacks the response of a `[request, close]` pipeline.
pub(crate) fn single_response(
    response: wire::PipelineResponse,
) -> Result<wire::Response, RetryDbError> {
    if response.results.len() != 2 {
        return Err(RetryDbError::Decode(format!(
            "result count mismatch: expected 2, got {}",
            response.results.len()
        )));
    }

    let mut iter = response.results.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| RetryDbError::Decode("missing statement result".to_owned()))?;
    let close = iter
        .next()
        .ok_or_else(|| RetryDbError::Decode("missing close result".to_owned()))?;

    let first = into_response(first, 0)?;
    match into_response(close, 1)? {
        wire::Response::Close {} => Ok(first),
        other => Err(RetryDbError::Decode(format!(
            "expected close response at request 1, got '{}'",
            other.kind()
        ))),
    }
}

fn into_response(
    result: wire::PipelineResult,
    request_index: usize,
) -> Result<wire::Response, RetryDbError> {
    match result.kind.as_str() {
        "ok" => result.response.ok_or_else(|| {
            RetryDbError::Decode(format!(
                "missing response payload for request {request_index}"
            ))
        }),
        "error" => {
            let error = result.error.ok_or_else(|| {
                RetryDbError::Decode(format!(
                    "missing error payload for request {request_index}"
                ))
            })?;
            Err(RetryDbError::Pipeline {
                request_index,
                message: error.message,
                code: error.code,
            })
        }
        other => Err(RetryDbError::Decode(format!(
            "unknown pipeline result type '{other}' at request {request_index}"
        ))),
    }
}

/// Expects an `execute` response.
pub(crate) fn expect_execute(
    response: wire::Response,
) -> Result<wire::ExecuteResult, RetryDbError> {
    match response {
        wire::Response::Execute { result } => Ok(result),
        other => Err(RetryDbError::Decode(format!(
            "expected execute response at request 0, got '{}'",
            other.kind()
        ))),
    }
}

/// Expects a `describe` response.
pub(crate) fn expect_describe(
    response: wire::Response,
) -> Result<wire::DescribeResult, RetryDbError> {
    match response {
        wire::Response::Describe { result } => Ok(result),
        other => Err(RetryDbError::Decode(format!(
            "expected describe response at request 0, got '{}'",
            other.kind()
        ))),
    }
}

/// Encodes one statement with its arguments.
pub(crate) fn encode_statement(
    sql: &str,
    params: Params,
    want_rows: bool,
) -> Result<ExecuteStatement, RetryDbError> {
    let (args, named_args) = match params {
        Params::Positional(values) => {
            let args = values
                .into_iter()
                .map(wire::Value::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            (Some(args), None)
        }
        Params::Named(values) => {
            let named = values
                .into_iter()
                .map(|(name, value)| {
                    Ok(NamedArg {
                        name: strip_parameter_prefix(&name)?.to_owned(),
                        value: value.try_into()?,
                    })
                })
                .collect::<Result<Vec<_>, RetryDbError>>()?;
            (None, Some(named))
        }
    };

    Ok(ExecuteStatement {
        sql: sql.to_owned(),
        args: args.filter(|args| !args.is_empty()),
        named_args: named_args.filter(|named| !named.is_empty()),
        want_rows,
    })
}

/// Removes the `:`, `@` or `$` sigil of a parameter name.
pub(crate) fn strip_parameter_prefix(name: &str) -> Result<&str, RetryDbError> {
    let stripped = name.trim_start_matches([':', '@', '$']);
    if stripped.is_empty() {
        return Err(RetryDbError::Decode(
            "named parameter name cannot be empty".to_owned(),
        ));
    }
    Ok(stripped)
}

impl From<wire::Col> for Col {
    fn from(col: wire::Col) -> Self {
        Self {
            name: col.name,
            decltype: col.decltype,
        }
    }
}

impl TryFrom<wire::ExecuteResult> for QueryResult {
    type Error = RetryDbError;

    fn try_from(result: wire::ExecuteResult) -> Result<Self, Self::Error> {
        let rows = result
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            cols: result.cols.into_iter().map(Col::from).collect(),
            rows,
            replication_index: result.replication_index,
            rows_read: result.rows_read,
            rows_written: result.rows_written,
            query_duration_ms: result.query_duration_ms,
        })
    }
}

impl TryFrom<wire::ExecuteResult> for ExecResult {
    type Error = RetryDbError;

    fn try_from(result: wire::ExecuteResult) -> Result<Self, Self::Error> {
        let last_insert_rowid = match result.last_insert_rowid {
            Some(raw) => Some(raw.parse::<i64>().map_err(|err| {
                RetryDbError::Decode(format!("invalid last_insert_rowid '{raw}': {err}"))
            })?),
            None => None,
        };

        Ok(Self {
            affected_row_count: result.affected_row_count,
            last_insert_rowid,
            replication_index: result.replication_index,
            rows_read: result.rows_read,
            rows_written: result.rows_written,
        })
    }
}

impl TryFrom<wire::Value> for Value {
    type Error = RetryDbError;

    fn try_from(value: wire::Value) -> Result<Self, Self::Error> {
        match value {
            wire::Value::Null {} => Ok(Self::Null),
            wire::Value::Integer { value } => value.parse().map(Self::Integer).map_err(|err| {
                RetryDbError::Decode(format!("invalid integer value '{value}': {err}"))
            }),
            wire::Value::Float { value } => match value.parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => Ok(Self::Float(parsed)),
                Ok(_) => Err(non_finite(&value)),
                Err(err) => Err(RetryDbError::Decode(format!(
                    "invalid float value '{value}': {err}"
                ))),
            },
            wire::Value::Text { value } => Ok(Self::Text(value)),
            wire::Value::Blob { base64 } => Ok(Self::BlobBase64(base64)),
        }
    }
}

impl TryFrom<Value> for wire::Value {
    type Error = RetryDbError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => Self::Null {},
            Value::Integer(value) => Self::Integer {
                value: value.to_string(),
            },
            Value::Float(value) if !value.is_finite() => return Err(non_finite(value)),
            Value::Float(value) => Self::Float {
                value: value.to_string(),
            },
            Value::Text(value) => Self::Text { value },
            Value::BlobBase64(base64) => Self::Blob { base64 },
        })
    }
}

fn non_finite(value: impl std::fmt::Display) -> RetryDbError {
    RetryDbError::Decode(format!("non-finite float value '{value}' is unsupported"))
}
