use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use retrydb::{
    CancellationToken, Col, Driver, ExecResult, Params, PreparedStatement, QueryResult,
    ResilientClient, ResilientNamedStatement, Result, RetryConfig, RetryDbError, Strategy,
    Value,
};
use tokio::time::Instant;

const MS: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug)]
enum Step {
    Ok,
    Fail,
    Hang,
}

/// Shared script consumed by a mock driver and its statements.
#[derive(Default)]
struct Script {
    steps: Mutex<VecDeque<Step>>,
    rows: Mutex<Vec<Vec<Value>>>,
    last_params: Mutex<Option<Params>>,
    hits: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    statement_closes: AtomicUsize,
}

impl Script {
    fn new(steps: &[Step]) -> Arc<Self> {
        let script = Self::default();
        *script.steps.lock().expect("steps lock") = steps.iter().copied().collect();
        *script.rows.lock().expect("rows lock") = vec![vec![Value::integer(7)]];
        Arc::new(script)
    }

    fn with_rows(self: Arc<Self>, rows: Vec<Vec<Value>>) -> Arc<Self> {
        *self.rows.lock().expect("rows lock") = rows;
        self
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    async fn play(&self, params: Option<Params>) -> Result<()> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if params.is_some() {
            *self.last_params.lock().expect("params lock") = params;
        }
        let step = self
            .steps
            .lock()
            .expect("steps lock")
            .pop_front()
            .unwrap_or(Step::Ok);
        match step {
            Step::Ok => Ok(()),
            Step::Fail => Err(RetryDbError::driver(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "scripted failure",
            ))),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(())
            }
        }
    }

    fn result(&self) -> QueryResult {
        QueryResult {
            cols: vec![Col {
                name: "n".to_owned(),
                decltype: Some("INTEGER".to_owned()),
            }],
            rows: self.rows.lock().expect("rows lock").clone(),
            ..QueryResult::default()
        }
    }
}

struct MockDriver {
    script: Arc<Script>,
}

impl MockDriver {
    fn new(script: &Arc<Script>) -> Self {
        script.opens.fetch_add(1, Ordering::SeqCst);
        Self {
            script: script.clone(),
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Statement = MockStatement;

    async fn open(datasource: &str) -> Result<Self> {
        if datasource == "mock://refused" {
            return Err(RetryDbError::InvalidDatasource(datasource.to_owned()));
        }
        let steps: &[Step] = if datasource == "mock://hang" {
            &[Step::Hang]
        } else {
            &[]
        };
        Ok(Self::new(&Script::new(steps)))
    }

    async fn ping(&self, _cancel: &CancellationToken) -> Result<()> {
        self.script.play(None).await
    }

    async fn query(
        &self,
        _sql: &str,
        params: Params,
        _cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        self.script.play(Some(params)).await?;
        Ok(self.script.result())
    }

    async fn execute(
        &self,
        _sql: &str,
        params: Params,
        _cancel: &CancellationToken,
    ) -> Result<ExecResult> {
        self.script.play(Some(params)).await?;
        Ok(ExecResult {
            affected_row_count: 1,
            ..ExecResult::default()
        })
    }

    async fn prepare(&self, _sql: &str, _cancel: &CancellationToken) -> Result<MockStatement> {
        self.script.play(None).await?;
        Ok(MockStatement {
            script: self.script.clone(),
        })
    }

    async fn close(&self) -> Result<()> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockStatement {
    script: Arc<Script>,
}

#[async_trait]
impl PreparedStatement for MockStatement {
    async fn query(&self, params: Params, _cancel: &CancellationToken) -> Result<QueryResult> {
        self.script.play(Some(params)).await?;
        Ok(self.script.result())
    }

    async fn execute(&self, params: Params, _cancel: &CancellationToken) -> Result<ExecResult> {
        self.script.play(Some(params)).await?;
        Ok(ExecResult::default())
    }

    async fn close(&self) -> Result<()> {
        self.script.statement_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config() -> RetryConfig {
    RetryConfig::default()
        .with_attempts(3)
        .with_strategy(Strategy::Consistent)
        .with_base_delay(10 * MS)
        .with_attempt_timeout(50 * MS)
        .with_deadline(Duration::from_secs(1))
}

fn client(script: &Arc<Script>, config: RetryConfig) -> ResilientClient<MockDriver> {
    ResilientClient::from_driver(MockDriver::new(script), config)
}

fn assert_elapsed(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + 5 * MS,
        "elapsed {elapsed:?}, expected {expected:?}"
    );
}

fn assert_not_connected<T: std::fmt::Debug>(result: Result<T>) {
    match result {
        Err(RetryDbError::NotConnected) => {}
        other => panic!("expected not connected, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn disconnected_client_fails_fast_on_every_verb() {
    let mut db = ResilientClient::<MockDriver>::default();
    let started = Instant::now();

    assert_not_connected(db.ping().await);
    assert_not_connected(db.query("SELECT 1", ()).await);
    assert_not_connected(db.execute("DELETE FROM t", ()).await);
    assert_not_connected(db.named_query("SELECT :a", [("a", Value::Null)]).await);
    assert_not_connected(db.named_execute("DELETE FROM t WHERE a = :a", [("a", Value::Null)]).await);
    assert_not_connected(db.get::<(i64,), _>("SELECT 1", ()).await);
    assert_not_connected(db.select::<(i64,), _>("SELECT 1", ()).await);
    assert_not_connected(db.prepare("SELECT 1").await);
    assert_not_connected(db.prepare_named("SELECT :a").await);

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(!db.is_connected());
    db.close().await.expect("closing an inert client is a no-op");
}

#[tokio::test(start_paused = true)]
async fn query_is_retried_until_success() {
    let script = Script::new(&[Step::Fail, Step::Fail, Step::Ok]);
    let db = client(&script, config());
    let started = Instant::now();

    let result = db
        .query("SELECT n FROM t WHERE n = ?", [Value::integer(7)])
        .await
        .expect("third attempt must succeed");

    assert_eq!(result.rows, vec![vec![Value::integer(7)]]);
    assert_eq!(script.hits(), 3);
    assert_elapsed(started, 20 * MS);
}

#[tokio::test(start_paused = true)]
async fn named_verbs_pass_named_params() {
    let script = Script::new(&[Step::Fail]);
    let db = client(&script, config());

    let result = db
        .named_execute("UPDATE t SET n = :n", [("n", Value::integer(8))])
        .await
        .expect("retry must succeed");

    assert_eq!(result.affected_row_count, 1);
    assert_eq!(script.hits(), 2);
    let params = script.last_params.lock().expect("params lock").clone();
    assert_eq!(
        params,
        Some(Params::Named(vec![("n".to_owned(), Value::integer(8))]))
    );
}

#[tokio::test(start_paused = true)]
async fn hanging_driver_exhausts_attempts_with_timeouts() {
    let script = Script::new(&[Step::Hang, Step::Hang, Step::Hang]);
    let db = client(&script, config());
    let started = Instant::now();

    let err = db
        .execute("DELETE FROM t", ())
        .await
        .expect_err("every attempt must time out");

    assert!(err.is_attempts_exhausted());
    assert!(matches!(
        err.last_error(),
        Some(RetryDbError::AttemptTimeout { .. })
    ));
    assert_eq!(script.hits(), 3);
    // Three timeouts of 50ms plus two waits of 10ms.
    assert_elapsed(started, 170 * MS);
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_a_hanging_sequence() {
    let script = Script::new(&[Step::Hang; 10]);
    let db = client(
        &script,
        config().with_attempts(10).with_deadline(135 * MS),
    );
    let started = Instant::now();

    let err = db
        .ping()
        .await
        .expect_err("deadline must fire");

    assert!(err.is_deadline_exceeded(), "got {err:?}");
    assert!(matches!(
        err.last_error(),
        Some(RetryDbError::AttemptTimeout { .. })
    ));
    assert_elapsed(started, 135 * MS);
    assert_eq!(script.hits(), 3);
}

#[tokio::test(start_paused = true)]
async fn get_retries_the_query_but_not_the_mapping() {
    let script = Script::new(&[Step::Fail]);
    let db = client(&script, config());

    let (n,): (i64,) = db.get("SELECT n FROM t", ()).await.expect("must map");
    assert_eq!(n, 7);
    assert_eq!(script.hits(), 2);

    let err = db
        .get::<(String,), _>("SELECT n FROM t", ())
        .await
        .expect_err("integer does not map to text");
    assert!(matches!(err, RetryDbError::Decode(_)));
    assert_eq!(script.hits(), 3);

    let empty = Script::new(&[]).with_rows(Vec::new());
    let db = client(&empty, config());
    let err = db
        .get::<(i64,), _>("SELECT n FROM t", ())
        .await
        .expect_err("no rows");
    assert!(matches!(err, RetryDbError::NoRows));
    assert_eq!(empty.hits(), 1);

    let all: Vec<(i64,)> = db.select("SELECT n FROM t", ()).await.expect("empty select");
    assert!(all.is_empty());
}

#[tokio::test(start_paused = true)]
async fn prepared_statement_inherits_the_client_config() {
    let script = Script::new(&[Step::Ok, Step::Fail, Step::Fail, Step::Fail, Step::Ok]);
    let config = config().with_attempts(4);
    let db = client(&script, config);

    let statement = db.prepare("SELECT n FROM t").await.expect("must prepare");
    assert_eq!(statement.config(), &config);

    let rows: Vec<(i64,)> = statement
        .select(())
        .await
        .expect("fourth attempt must succeed");
    assert_eq!(rows, vec![(7,)]);
    assert_eq!(script.hits(), 5);
}

#[tokio::test(start_paused = true)]
async fn statement_get_is_retried() {
    let script = Script::new(&[Step::Ok, Step::Fail]);
    let db = client(&script, config());
    let statement = db.prepare("SELECT n FROM t WHERE n = ?").await.expect("must prepare");

    let (n,): (i64,) = statement
        .get([Value::integer(7)])
        .await
        .expect("retry must succeed");

    assert_eq!(n, 7);
    assert_eq!(script.hits(), 3);
}

#[tokio::test(start_paused = true)]
async fn named_statement_runs_with_named_args() {
    let script = Script::new(&[]);
    let db = client(&script, config());
    let statement = db
        .prepare_named("UPDATE t SET n = :n")
        .await
        .expect("must prepare");

    statement
        .execute([("n", Value::integer(1))])
        .await
        .expect("must execute");

    let params = script.last_params.lock().expect("params lock").clone();
    assert!(params.is_some_and(|params| params.is_named()));
}

#[tokio::test(start_paused = true)]
async fn named_statement_get_and_select_are_retried() {
    let script = Script::new(&[Step::Ok, Step::Fail, Step::Ok, Step::Fail, Step::Fail]);
    let db = client(&script, config());
    let statement = db
        .prepare_named("SELECT n FROM t WHERE n = :n")
        .await
        .expect("must prepare");
    let started = Instant::now();

    let (n,): (i64,) = statement
        .get([("n", Value::integer(7))])
        .await
        .expect("second attempt must succeed");
    assert_eq!(n, 7);
    assert_eq!(script.hits(), 3);

    let rows: Vec<(i64,)> = statement
        .select([("n", Value::integer(7))])
        .await
        .expect("third attempt must succeed");
    assert_eq!(rows, vec![(7,)]);
    assert_eq!(script.hits(), 6);
    assert_elapsed(started, 30 * MS);

    let result = statement
        .query([("n", Value::integer(7))])
        .await
        .expect("must query");
    assert_eq!(result.rows.len(), 1);
    let params = script.last_params.lock().expect("params lock").clone();
    assert_eq!(
        params,
        Some(Params::Named(vec![("n".to_owned(), Value::integer(7))]))
    );
}

#[tokio::test(start_paused = true)]
async fn closed_named_statement_is_inert() {
    let script = Script::new(&[]);
    let db = client(&script, config());
    let mut statement = db
        .prepare_named("SELECT n FROM t WHERE n = :n")
        .await
        .expect("must prepare");
    let other = statement.clone();

    statement.close().await.expect("must close");
    statement.close().await.expect("second close is a no-op");
    let hits = script.hits();
    let args = || [("n", Value::integer(7))];

    for statement in [&statement, &other] {
        assert!(!statement.is_open());
        assert_not_connected(statement.query(args()).await);
        assert_not_connected(statement.execute(args()).await);
        assert_not_connected(statement.get::<(i64,), _, _>(args()).await);
        assert_not_connected(statement.select::<(i64,), _, _>(args()).await);
    }
    assert_eq!(script.hits(), hits);
    assert_eq!(script.statement_closes.load(Ordering::SeqCst), 1);

    let never_prepared = ResilientNamedStatement::<MockDriver>::closed(config());
    assert!(!never_prepared.is_open());
    assert_not_connected(never_prepared.query(args()).await);
    assert_not_connected(never_prepared.execute(args()).await);
    assert_not_connected(never_prepared.get::<(i64,), _, _>(args()).await);
    assert_not_connected(never_prepared.select::<(i64,), _, _>(args()).await);
    assert_eq!(script.hits(), hits);
}

#[tokio::test(start_paused = true)]
async fn closed_statement_is_inert() {
    let script = Script::new(&[]);
    let db = client(&script, config());
    let mut statement = db.prepare("SELECT n FROM t").await.expect("must prepare");

    statement.close().await.expect("must close");
    statement.close().await.expect("second close is a no-op");
    let hits = script.hits();

    assert!(!statement.is_open());
    assert_not_connected(statement.query(()).await);
    assert_not_connected(statement.execute(()).await);
    assert_not_connected(statement.get::<(i64,), _>(()).await);
    assert_not_connected(statement.select::<(i64,), _>(()).await);
    assert_eq!(script.hits(), hits);
    assert_eq!(script.statement_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn closed_client_is_inert() {
    let script = Script::new(&[]);
    let mut db = client(&script, config());

    db.close().await.expect("must close");
    db.close().await.expect("second close is a no-op");

    assert_not_connected(db.query("SELECT 1", ()).await);
    assert_eq!(script.hits(), 0);
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn closing_one_clone_makes_every_clone_inert() {
    let script = Script::new(&[]);
    let mut db = client(&script, config());
    let mut other = db.clone();
    let statement = db.prepare("SELECT n FROM t").await.expect("must prepare");
    let mut statement_clone = statement.clone();
    let hits = script.hits();

    db.close().await.expect("must close");

    assert!(!other.is_connected());
    assert!(other.driver().is_none());
    assert_not_connected(other.ping().await);
    assert_not_connected(other.query("SELECT 1", ()).await);
    assert_not_connected(other.named_execute("DELETE FROM t WHERE n = :n", [("n", Value::Null)]).await);
    assert_not_connected(other.prepare("SELECT 1").await);
    other.close().await.expect("closing a closed clone is a no-op");

    statement_clone.close().await.expect("must close statement");
    assert!(!statement.is_open());
    assert_not_connected(statement.query(()).await);

    assert_eq!(script.hits(), hits);
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
    assert_eq!(script.statement_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_with_retries_open_and_ping() {
    let script = Script::new(&[Step::Fail, Step::Fail, Step::Ok]);
    let opener_script = script.clone();

    let db = ResilientClient::connect_with(config(), move || {
        let script = opener_script.clone();
        async move { Ok(MockDriver::new(&script)) }
    })
    .await
    .expect("third ping must succeed");

    assert!(db.is_connected());
    assert_eq!(script.opens.load(Ordering::SeqCst), 3);
    // Drivers whose ping failed are closed.
    assert_eq!(script.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_with_retry_exhausts_on_refused_datasource() {
    let started = Instant::now();

    let err = ResilientClient::<MockDriver>::connect_with_retry("mock://refused", config())
        .await
        .expect_err("open must keep failing");

    match err {
        RetryDbError::AttemptsExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, RetryDbError::InvalidDatasource(_)));
        }
        other => panic!("expected attempts exhausted, got {other:?}"),
    }
    assert_elapsed(started, 20 * MS);
}

#[tokio::test(start_paused = true)]
async fn connect_opens_once_without_retry() {
    let err = ResilientClient::<MockDriver>::connect("mock://refused")
        .await
        .expect_err("open must fail");
    assert!(matches!(err, RetryDbError::InvalidDatasource(_)));

    let db = ResilientClient::<MockDriver>::connect("mock://ok")
        .await
        .expect("open must succeed");
    assert_eq!(db.config(), &RetryConfig::default());
}

#[tokio::test(start_paused = true)]
async fn connect_is_bounded_by_the_attempt_timeout() {
    let started = Instant::now();

    let err = ResilientClient::<MockDriver>::connect("mock://hang")
        .await
        .expect_err("hanging ping must time out");

    assert!(matches!(err, RetryDbError::AttemptTimeout { .. }), "got {err:?}");
    assert_elapsed(started, RetryConfig::default().attempt_timeout);
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected_before_any_attempt() {
    let script = Script::new(&[]);
    let db = client(&script, config().with_attempts(0));

    let err = db.ping().await.expect_err("must reject config");

    assert!(matches!(err, RetryDbError::InvalidConfiguration(_)));
    assert_eq!(script.hits(), 0);
}
