use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::OutboxResult;

/// Initialize a connection pool to the PostgreSQL database
///
/// Pool sizing is tunable through `DB_MAX_CONNECTIONS` (default 10),
/// `DB_MIN_CONNECTIONS` (default 0) and `DB_ACQUIRE_TIMEOUT_SECS` (default 3).
/// Test runs should cap connections low.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let max_connections = env_parse("DB_MAX_CONNECTIONS").unwrap_or(10);
    let min_connections = env_parse("DB_MIN_CONNECTIONS").unwrap_or(0);
    let acquire_timeout_secs = env_parse("DB_ACQUIRE_TIMEOUT_SECS").unwrap_or(3);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Apply the outbox schema migrations
pub async fn migrate(pool: &PgPool) -> OutboxResult<()> {
    sqlx::migrate!("./db/migrations").run(pool).await?;
    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
