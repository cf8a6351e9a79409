use outbox::{db, OutboxConfig, OutboxProcessor, PgOutboxStore};
use outbox_relay::{build_producer, config::Config, connect_bus};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting outbox relay...");

    let config = Config::from_env()?;
    let outbox_config = OutboxConfig::from_env()?;

    tracing::info!(
        "Configuration loaded: bus_type={}, producer_type={}, batch_size={}, poll_interval_ms={}",
        config.bus_type,
        config.producer_type,
        outbox_config.batch_size,
        outbox_config.poll_interval_ms
    );

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;

    tracing::info!("Running migrations...");
    db::migrate(&pool).await?;

    let bus = connect_bus(&config).await?;
    let producer = build_producer(&config, bus);
    let store = Arc::new(PgOutboxStore::new(pool));

    let processor = OutboxProcessor::new(store, producer, outbox_config)?;
    processor
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await;

    tracing::info!("Outbox relay stopped");
    Ok(())
}
