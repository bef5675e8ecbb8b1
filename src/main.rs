use authorization_engine::cancel::CancelToken;
use authorization_engine::clock::{Clock, SystemClock};
use authorization_engine::config::{Settings, StorageBackend};
use authorization_engine::error::Result;
use authorization_engine::idempotency::{
    IdempotencyCleanupJob, IdempotencyCoordinator, IdempotencyStore, InMemoryIdempotencyStore,
    PostgresIdempotencyStore, RedisIdempotencyStore,
};
use authorization_engine::observability::{init_logging, init_metrics, HealthChecker};
use authorization_engine::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    init_logging(&settings.logging)?;
    let _metrics = init_metrics()?;
    info!("Configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = connect_store(&settings, Arc::clone(&clock)).await?;

    let breakers = Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerConfig::from_settings(&settings.resilience),
        Arc::clone(&clock),
    ));
    breakers.get_or_create(&settings.authorizer.target);

    let coordinator = Arc::new(IdempotencyCoordinator::new(
        Arc::clone(&store),
        &settings.idempotency,
    ));

    let shutdown = CancelToken::new();
    let cleanup = IdempotencyCleanupJob::new(
        coordinator,
        Duration::from_secs(settings.idempotency.cleanup_interval_seconds),
    )
    .start(shutdown.clone());

    let health = HealthChecker::new(breakers, Some(store)).report().await;
    info!(
        status = ?health.status,
        components = health.components.len(),
        "Idempotency sweeper started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown.cancel();
    cleanup.await?;

    Ok(())
}

async fn connect_store(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Arc<dyn IdempotencyStore>> {
    let store: Arc<dyn IdempotencyStore> = match settings.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory idempotency store");
            Arc::new(InMemoryIdempotencyStore::new(clock))
        }
        StorageBackend::Redis => {
            info!("Connecting to Redis at {}...", settings.storage.redis_url);
            let client = redis::Client::open(settings.storage.redis_url.as_str())?;
            let mut con = client.get_multiplexed_async_connection().await?;
            let _: () = redis::cmd("PING").query_async(&mut con).await?;
            info!("Redis connection established");
            Arc::new(RedisIdempotencyStore::new(
                client,
                settings.idempotency.key_prefix.clone(),
                clock,
            ))
        }
        StorageBackend::Postgres => {
            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(settings.storage.pool_size)
                .acquire_timeout(Duration::from_secs(5))
                .connect(&settings.storage.database_url)
                .await?;
            let store = PostgresIdempotencyStore::new(pool, clock);
            store.migrate().await?;
            info!("Migrations applied successfully");
            Arc::new(store)
        }
    };

    Ok(store)
}
