use std::time::Duration;

use retrydb::{HttpDriver, ResilientClient, RetryConfig, Strategy, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let datasource = std::env::var("RETRYDB_DATABASE_URL")?;

    let config = RetryConfig::default()
        .with_attempts(5)
        .with_strategy(Strategy::Exponential)
        .with_base_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_attempt_timeout(Duration::from_secs(5))
        .with_deadline(Duration::from_secs(20));

    let mut db = ResilientClient::<HttpDriver>::connect_with_retry(&datasource, config).await?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        (),
    )
    .await?;

    db.execute("INSERT INTO users (name) VALUES (?)", [Value::text("Kit")])
        .await?;

    let users: Vec<(i64, String)> = db
        .select("SELECT id, name FROM users ORDER BY id", ())
        .await?;
    for (id, name) in users {
        println!("{id}: {name}");
    }

    let mut by_name = db
        .prepare_named("SELECT id FROM users WHERE name = :name")
        .await?;
    let (id,): (i64,) = by_name.get([("name", Value::text("Kit"))]).await?;
    println!("Kit has id {id}");
    by_name.close().await?;

    db.close().await?;
    Ok(())
}
